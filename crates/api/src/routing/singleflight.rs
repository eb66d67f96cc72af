//! Singleflight for deduplicating concurrent loads of the same host key.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::broadcast;

/// Result of trying to acquire a flight slot.
pub enum FlightSlot<T> {
    /// We won the race and should run the load.
    Leader(FlightLeader<T>),
    /// Another task is loading; wait for its result.
    Follower(broadcast::Receiver<T>),
}

/// Leader side of a flight: the sender plus the id that owns the slot.
pub struct FlightLeader<T> {
    pub sender: broadcast::Sender<T>,
    pub flight_id: u64,
}

/// In-flight map keyed by cache key.
///
/// Each registered flight carries an id so a leader that finishes after its
/// slot was dropped (by invalidation) never removes a newer flight.
pub struct Singleflight<K, T>
where
    K: Hash + Eq + Clone,
    T: Clone,
{
    in_flight: DashMap<K, (u64, broadcast::Sender<T>)>,
    next_id: AtomicU64,
}

impl<K, T> Singleflight<K, T>
where
    K: Hash + Eq + Clone,
    T: Clone,
{
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Atomically become the leader for `key` or subscribe to the current one.
    ///
    /// Uses DashMap's entry API so the check and the insert happen under the
    /// same shard lock.
    pub fn acquire(&self, key: K) -> FlightSlot<T> {
        use dashmap::mapref::entry::Entry;

        match self.in_flight.entry(key) {
            Entry::Occupied(entry) => FlightSlot::Follower(entry.get().1.subscribe()),
            Entry::Vacant(entry) => {
                let flight_id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (sender, _rx) = broadcast::channel(1);
                entry.insert((flight_id, sender.clone()));
                FlightSlot::Leader(FlightLeader { sender, flight_id })
            }
        }
    }

    /// Remove the slot for `key` if it still belongs to `flight_id`.
    pub fn complete(&self, key: &K, flight_id: u64) {
        self.in_flight.remove_if(key, |_, (id, _)| *id == flight_id);
    }

    /// Drop the slot for `key` regardless of owner. Later callers start a
    /// fresh load; callers already waiting still get the old leader's result.
    pub fn forget(&self, key: &K) {
        self.in_flight.remove(key);
    }

    /// Drop every slot.
    pub fn forget_all(&self) {
        self.in_flight.clear();
    }

    /// Number of loads currently in flight.
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

impl<K, T> Default for Singleflight<K, T>
where
    K: Hash + Eq + Clone,
    T: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that releases the flight slot on drop.
///
/// A leader that is cancelled (timeout, dropped request) releases its slot
/// here; waiting followers see the channel close and retry.
pub struct FlightGuard<'a, K, T>
where
    K: Hash + Eq + Clone,
    T: Clone,
{
    singleflight: &'a Singleflight<K, T>,
    key: K,
    flight_id: u64,
    completed: bool,
}

impl<'a, K, T> FlightGuard<'a, K, T>
where
    K: Hash + Eq + Clone,
    T: Clone,
{
    pub fn new(singleflight: &'a Singleflight<K, T>, key: K, flight_id: u64) -> Self {
        Self {
            singleflight,
            key,
            flight_id,
            completed: false,
        }
    }

    /// Mark as completed (normal path).
    pub fn complete(mut self) {
        self.singleflight.complete(&self.key, self.flight_id);
        self.completed = true;
    }
}

impl<K, T> Drop for FlightGuard<'_, K, T>
where
    K: Hash + Eq + Clone,
    T: Clone,
{
    fn drop(&mut self) {
        if !self.completed {
            self.singleflight.complete(&self.key, self.flight_id);
        }
    }
}
