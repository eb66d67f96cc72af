//! In-memory resolution cache with TTL, LRU bound and single-flight loads
//!
//! Caches host-to-tenant lookups (including negative results) so routing
//! does not hit the database on every request.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tenantry_shared::{DomainKey, TenantError, TenantId, TenantResult};

use super::host_resolver::ResolvedTenant;
use super::lookup::LookupError;
use super::singleflight::{FlightGuard, FlightSlot, Singleflight};

/// Default TTL for positive entries (5 minutes)
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default TTL for negative entries (30 seconds)
pub const DEFAULT_NOTFOUND_TTL: Duration = Duration::from_secs(30);

/// Default maximum number of cached hosts
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// What a host resolved to
#[derive(Debug, Clone)]
pub enum Resolution {
    Found(ResolvedTenant),
    /// The lookup completed and no tenant owns the host
    NotFound,
}

impl Resolution {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        match self {
            Self::Found(resolved) => Some(resolved.tenant.id),
            Self::NotFound => None,
        }
    }
}

/// Cache settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Expiry for found entries; `None` caches until invalidated
    pub ttl: Option<Duration>,
    /// Expiry for not-found entries; `None` caches until invalidated
    pub notfound_ttl: Option<Duration>,
    /// Eviction threshold
    pub max_entries: usize,
    /// Upper bound on a single load; `None` leaves it to the caller
    pub load_timeout: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Some(DEFAULT_CACHE_TTL),
            notfound_ttl: Some(DEFAULT_NOTFOUND_TTL),
            max_entries: DEFAULT_MAX_ENTRIES,
            load_timeout: None,
        }
    }
}

impl CacheConfig {
    /// Zero disables expiry for found entries.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = non_zero(ttl);
        self
    }

    /// Zero disables expiry for not-found entries.
    pub fn with_notfound_ttl(mut self, ttl: Duration) -> Self {
        self.notfound_ttl = non_zero(ttl);
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = non_zero(timeout);
        self
    }
}

fn non_zero(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}

/// Cache entry; replaced, never mutated, apart from its LRU ticks
struct CacheEntry {
    value: Resolution,
    expires_at: Option<Instant>,
    version: u64,
    /// Bumped by hits under the read lock
    last_used: AtomicU64,
    /// Tick this entry is filed under in `CacheState::recency`
    filed_at: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

struct CacheState {
    entries: HashMap<DomainKey, CacheEntry>,
    /// Keys ordered by `filed_at`. Hits only bump `last_used`; an entry
    /// that reaches the front with a newer tick is filed again.
    recency: BTreeMap<u64, DomainKey>,
    /// Bumped by every invalidation; loads that started under an older
    /// epoch are returned to their callers but not stored
    epoch: u64,
}

impl CacheState {
    fn put(&mut self, key: DomainKey, entry: CacheEntry) {
        self.recency.insert(entry.filed_at, key.clone());
        if let Some(old) = self.entries.insert(key, entry) {
            self.recency.remove(&old.filed_at);
        }
    }

    fn remove(&mut self, key: &DomainKey) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.recency.remove(&entry.filed_at);
                true
            }
            None => false,
        }
    }

    /// Keep entries matching `keep`; returns the number removed
    fn retain(&mut self, mut keep: impl FnMut(&DomainKey, &CacheEntry) -> bool) -> usize {
        let before = self.entries.len();
        let recency = &mut self.recency;
        self.entries.retain(|key, entry| {
            let kept = keep(key, entry);
            if !kept {
                recency.remove(&entry.filed_at);
            }
            kept
        });
        before - self.entries.len()
    }

    fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        self.recency.clear();
        removed
    }

    /// Remove and return the least recently used key
    fn pop_lru(&mut self) -> Option<DomainKey> {
        while let Some((filed_at, key)) = self.recency.pop_first() {
            let Some(entry) = self.entries.get_mut(&key) else {
                continue;
            };
            let last_used = entry.last_used.load(Ordering::Relaxed);
            if last_used == filed_at {
                self.entries.remove(&key);
                return Some(key);
            }
            // Hit since it was filed
            entry.filed_at = last_used;
            self.recency.insert(last_used, key);
        }
        None
    }
}

type LoadOutcome = TenantResult<Resolution>;

/// Thread-safe bounded resolution cache
pub struct ResolutionCache {
    state: RwLock<CacheState>,
    flights: Singleflight<DomainKey, LoadOutcome>,
    config: CacheConfig,
    clock: AtomicU64,
    next_version: AtomicU64,
    counters: Counters,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl Default for ResolutionCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl ResolutionCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            state: RwLock::new(CacheState {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                epoch: 0,
            }),
            flights: Singleflight::new(),
            config,
            clock: AtomicU64::new(0),
            next_version: AtomicU64::new(1),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Resolve `key`, calling `loader` on a miss.
    ///
    /// Concurrent misses for the same key share one `loader` call. Loader
    /// failures and timeouts surface as `ResolutionUnavailable` and are never
    /// cached.
    pub async fn resolve<F, Fut>(&self, key: &DomainKey, loader: F) -> LoadOutcome
    where
        F: FnOnce(DomainKey) -> Fut,
        Fut: Future<Output = Result<Resolution, LookupError>>,
    {
        // Each call counts once: as a hit if it is answered from the table,
        // as a miss if it waits for or performs a load
        if let Some(value) = self.lookup(key) {
            return Ok(self.record_hit(key, value));
        }

        let leader = loop {
            match self.flights.acquire(key.clone()) {
                FlightSlot::Leader(leader) => break leader,
                FlightSlot::Follower(mut receiver) => match receiver.recv().await {
                    Ok(outcome) => {
                        self.counters.misses.fetch_add(1, Ordering::Relaxed);
                        return outcome;
                    }
                    Err(_) => {
                        // Leader went away without a result (cancelled or
                        // timed out by its caller); try again
                        if let Some(value) = self.lookup(key) {
                            return Ok(self.record_hit(key, value));
                        }
                    }
                },
            }
        };

        let guard = FlightGuard::new(&self.flights, key.clone(), leader.flight_id);

        // A previous leader may have stored the entry between our miss and
        // acquiring the slot
        if let Some(value) = self.lookup(key) {
            guard.complete();
            let _ = leader.sender.send(Ok(value.clone()));
            return Ok(self.record_hit(key, value));
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let epoch = self.read_state().epoch;
        let outcome = self.load(key, loader).await;

        if let Ok(value) = &outcome {
            self.store(key, value.clone(), epoch);
        }

        // Release the slot before broadcasting: followers subscribed so far
        // get the result, later callers see the stored entry
        guard.complete();
        let _ = leader.sender.send(outcome.clone());
        outcome
    }

    fn record_hit(&self, key: &DomainKey, value: Resolution) -> Resolution {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(host = %key, "Resolution cache hit");
        value
    }

    async fn load<F, Fut>(&self, key: &DomainKey, loader: F) -> LoadOutcome
    where
        F: FnOnce(DomainKey) -> Fut,
        Fut: Future<Output = Result<Resolution, LookupError>>,
    {
        self.counters.loads.fetch_add(1, Ordering::Relaxed);

        let result = match self.config.load_timeout {
            Some(limit) => match tokio::time::timeout(limit, loader(key.clone())).await {
                Ok(result) => result,
                Err(_) => Err(LookupError::Timeout(limit)),
            },
            None => loader(key.clone()).await,
        };

        result.map_err(|e| {
            self.counters.load_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(host = %key, error = %e, "Tenant lookup failed");
            TenantError::ResolutionUnavailable(e.to_string())
        })
    }

    /// Cached value for `key`, if present and not expired. Bumps LRU order.
    pub fn get(&self, key: &DomainKey) -> Option<Resolution> {
        self.lookup(key)
    }

    fn lookup(&self, key: &DomainKey) -> Option<Resolution> {
        let state = self.read_state();
        let entry = state.entries.get(key)?;

        if entry.is_expired(Instant::now()) {
            return None;
        }

        entry.last_used.store(self.tick(), Ordering::Relaxed);
        Some(entry.value.clone())
    }

    /// Cached value for `key` without touching LRU order
    pub fn peek(&self, key: &DomainKey) -> Option<Resolution> {
        let state = self.read_state();
        state
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| entry.value.clone())
    }

    /// Version of the live entry for `key`
    pub fn version(&self, key: &DomainKey) -> Option<u64> {
        let state = self.read_state();
        state
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| entry.version)
    }

    /// Insert a value directly (pre-warming), replacing any existing entry
    pub fn insert(&self, key: DomainKey, value: Resolution) {
        let mut state = self.write_state();
        self.insert_locked(&mut state, key, value);
    }

    fn store(&self, key: &DomainKey, value: Resolution, epoch: u64) {
        let mut state = self.write_state();
        if state.epoch != epoch {
            tracing::debug!(
                host = %key,
                "Cache invalidated during load - result not cached"
            );
            return;
        }
        self.insert_locked(&mut state, key.clone(), value);
    }

    fn insert_locked(&self, state: &mut CacheState, key: DomainKey, value: Resolution) {
        let ttl = if value.is_not_found() {
            self.config.notfound_ttl
        } else {
            self.config.ttl
        };

        let tick = self.tick();
        let entry = CacheEntry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
            version: self.next_version.fetch_add(1, Ordering::Relaxed),
            last_used: AtomicU64::new(tick),
            filed_at: tick,
        };
        state.put(key, entry);

        self.enforce_capacity(state);
    }

    fn enforce_capacity(&self, state: &mut CacheState) {
        let max_entries = self.config.max_entries.max(1);
        let mut evicted = 0u64;

        while state.entries.len() > max_entries {
            match state.pop_lru() {
                Some(key) => {
                    tracing::debug!(host = %key, "Evicted least recently used entry");
                    evicted += 1;
                }
                None => break,
            }
        }

        if evicted > 0 {
            self.counters.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
    }

    /// Invalidate a specific host key. No-op if the key is not cached.
    pub fn invalidate(&self, key: &DomainKey) -> bool {
        let removed = {
            let mut state = self.write_state();
            state.epoch += 1;
            state.remove(key)
        };
        self.flights.forget(key);
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        removed
    }

    /// Invalidate all entries resolving to a tenant
    pub fn invalidate_tenant(&self, tenant_id: TenantId) -> usize {
        self.invalidate_where(|_, value| value.tenant_id() == Some(tenant_id))
    }

    /// Invalidate every entry matching `predicate`. Loads already in flight
    /// finish for their callers but are not stored.
    pub fn invalidate_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&DomainKey, &Resolution) -> bool,
    {
        let removed = {
            let mut state = self.write_state();
            state.epoch += 1;
            state.retain(|key, entry| !predicate(key, &entry.value))
        };
        // In-flight loads cannot be matched against the predicate yet
        self.flights.forget_all();
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        removed
    }

    /// Clear every entry
    pub fn flush_all(&self) -> usize {
        let removed = {
            let mut state = self.write_state();
            state.epoch += 1;
            state.clear()
        };
        self.flights.forget_all();
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        tracing::info!(removed, "Resolution cache flushed");
        removed
    }

    /// Clear expired entries (call periodically for memory management)
    pub fn purge_expired(&self) -> usize {
        let mut state = self.write_state();
        let now = Instant::now();
        state.retain(|_, entry| !entry.is_expired(now))
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.read_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live keys, sorted
    pub fn keys(&self) -> Vec<DomainKey> {
        let now = Instant::now();
        let state = self.read_state();
        let mut keys: Vec<DomainKey> = state
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let (total, expired, negative) = {
            let state = self.read_state();
            let expired = state.entries.values().filter(|e| e.is_expired(now)).count();
            let negative = state
                .entries
                .values()
                .filter(|e| !e.is_expired(now) && e.value.is_not_found())
                .count();
            (state.entries.len(), expired, negative)
        };

        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheStats {
            total_entries: total,
            expired_entries: expired,
            active_entries: total - expired,
            negative_entries: negative,
            max_entries: self.config.max_entries,
            in_flight: self.flights.len(),
            hits,
            misses,
            loads: self.counters.loads.load(Ordering::Relaxed),
            load_failures: self.counters.load_failures.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    // Nothing panics while holding the lock, so a poisoned lock still
    // guards consistent data
    fn read_state(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cache statistics
#[derive(Default, Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub active_entries: usize,
    pub negative_entries: usize,
    pub max_entries: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub hit_rate: f64,
}
