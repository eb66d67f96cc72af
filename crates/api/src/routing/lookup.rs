//! Tenant lookup backends
//!
//! The resolver calls a [`TenantLookup`] once per candidate key on a cache
//! miss. Two backends:
//! - [`PgTenantLookup`]: `sites` / `site_aliases` tables in Postgres
//! - [`StaticTenantLookup`]: in-memory table for local development and tests

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tenantry_shared::{DomainKey, Tenant, TenantId};

use super::DomainNormalizer;

/// Errors a lookup backend can report. All of them mean "could not answer",
/// never "no such tenant".
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Lookup timed out after {0:?}")]
    Timeout(Duration),

    #[error("Lookup backend unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for LookupError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => LookupError::Unavailable("connection pool timed out".into()),
            other => LookupError::Database(other.to_string()),
        }
    }
}

/// Source of tenant records. Must be safe to call concurrently.
#[async_trait]
pub trait TenantLookup: Send + Sync {
    /// Find the tenant owning `domain` (canonical or alias), if any
    async fn find_by_domain(&self, domain: &DomainKey) -> Result<Option<Tenant>, LookupError>;
}

// =============================================================================
// Postgres
// =============================================================================

/// Postgres-backed lookup.
///
/// Expects `sites (id BIGINT, name TEXT, domain TEXT)` and
/// `site_aliases (site_id BIGINT, domain TEXT)`. Stored domains are matched
/// case-insensitively, with or without a leading `www.`.
#[derive(Clone)]
pub struct PgTenantLookup {
    pool: PgPool,
}

impl PgTenantLookup {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TenantLookup for PgTenantLookup {
    async fn find_by_domain(&self, domain: &DomainKey) -> Result<Option<Tenant>, LookupError> {
        #[derive(sqlx::FromRow)]
        struct SiteRow {
            id: i64,
            name: String,
            domain: String,
        }

        #[derive(sqlx::FromRow)]
        struct AliasRow {
            domain: String,
        }

        let www = format!("www.{}", domain);

        // Canonical domain match beats an alias match
        let site: Option<SiteRow> = sqlx::query_as(
            r#"
            SELECT s.id, s.name, s.domain
            FROM sites s
            WHERE lower(s.domain) IN ($1, $2)
               OR EXISTS (
                    SELECT 1 FROM site_aliases a
                    WHERE a.site_id = s.id AND lower(a.domain) IN ($1, $2)
               )
            ORDER BY (lower(s.domain) IN ($1, $2)) DESC, s.id
            LIMIT 1
            "#,
        )
        .bind(domain.as_str())
        .bind(&www)
        .fetch_optional(&self.pool)
        .await?;

        let Some(site) = site else {
            return Ok(None);
        };

        let aliases: Vec<AliasRow> = sqlx::query_as(
            "SELECT domain FROM site_aliases WHERE site_id = $1 AND domain <> $2 ORDER BY domain",
        )
        .bind(site.id)
        .bind(&site.domain)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Tenant {
            id: TenantId(site.id),
            name: site.name,
            domain: site.domain,
            aliases: aliases.into_iter().map(|a| a.domain).collect(),
        }))
    }
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Default)]
struct StaticTable {
    tenants: HashMap<TenantId, Tenant>,
    by_domain: HashMap<DomainKey, TenantId>,
}

/// In-memory lookup keyed by canonicalized domain
pub struct StaticTenantLookup {
    normalizer: DomainNormalizer,
    table: RwLock<StaticTable>,
    lookups: AtomicU64,
}

impl Default for StaticTenantLookup {
    fn default() -> Self {
        Self::new(DomainNormalizer::default())
    }
}

impl StaticTenantLookup {
    /// Domains are indexed through `normalizer` so they match the keys the
    /// resolver asks for. Use the resolver's normalizer settings.
    pub fn new(normalizer: DomainNormalizer) -> Self {
        Self {
            normalizer,
            table: RwLock::new(StaticTable::default()),
            lookups: AtomicU64::new(0),
        }
    }

    pub fn with_tenants(normalizer: DomainNormalizer, tenants: impl IntoIterator<Item = Tenant>) -> Self {
        let lookup = Self::new(normalizer);
        for tenant in tenants {
            lookup.upsert(tenant);
        }
        lookup
    }

    /// Load tenants from a JSON array file
    pub fn from_json_file(normalizer: DomainNormalizer, path: &Path) -> Result<Self, LookupError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LookupError::Unavailable(format!("failed to read {}: {}", path.display(), e))
        })?;
        let tenants: Vec<Tenant> = serde_json::from_str(&raw).map_err(|e| {
            LookupError::Unavailable(format!("invalid tenants file {}: {}", path.display(), e))
        })?;

        tracing::info!(path = %path.display(), count = tenants.len(), "Loaded static tenants");
        Ok(Self::with_tenants(normalizer, tenants))
    }

    /// Insert or replace a tenant. Returns the previous record.
    pub fn upsert(&self, tenant: Tenant) -> Option<Tenant> {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        let previous = Self::remove_locked(&mut table, tenant.id);

        for domain in tenant.domains() {
            table
                .by_domain
                .insert(self.normalizer.canonical(domain), tenant.id);
        }
        table.tenants.insert(tenant.id, tenant);
        previous
    }

    /// Remove a tenant. Returns the removed record.
    pub fn remove(&self, id: TenantId) -> Option<Tenant> {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        Self::remove_locked(&mut table, id)
    }

    fn remove_locked(table: &mut StaticTable, id: TenantId) -> Option<Tenant> {
        let previous = table.tenants.remove(&id)?;
        table.by_domain.retain(|_, owner| *owner != id);
        Some(previous)
    }

    pub fn get(&self, id: TenantId) -> Option<Tenant> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table.tenants.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tenants
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `find_by_domain` calls served
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TenantLookup for StaticTenantLookup {
    async fn find_by_domain(&self, domain: &DomainKey) -> Result<Option<Tenant>, LookupError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        Ok(table
            .by_domain
            .get(domain)
            .and_then(|id| table.tenants.get(id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup() -> StaticTenantLookup {
        StaticTenantLookup::with_tenants(
            DomainNormalizer::default(),
            [
                Tenant::new(1, "Acme", "www.Acme.com").with_alias("acme.io"),
                Tenant::new(2, "Globex", "globex.example.com"),
            ],
        )
    }

    #[tokio::test]
    async fn test_finds_canonical_and_alias_domains() {
        let lookup = lookup();

        let acme = lookup.find_by_domain(&DomainKey::new("acme.com")).await.unwrap();
        assert_eq!(acme.map(|t| t.id), Some(TenantId(1)));

        let alias = lookup.find_by_domain(&DomainKey::new("acme.io")).await.unwrap();
        assert_eq!(alias.map(|t| t.id), Some(TenantId(1)));

        let missing = lookup.find_by_domain(&DomainKey::new("initech.com")).await.unwrap();
        assert!(missing.is_none());

        assert_eq!(lookup.lookup_count(), 3);
    }

    #[tokio::test]
    async fn test_upsert_reindexes_domains() {
        let lookup = lookup();

        let previous = lookup.upsert(Tenant::new(2, "Globex", "globex.com"));
        assert_eq!(previous.map(|t| t.domain), Some("globex.example.com".to_string()));

        let old = lookup
            .find_by_domain(&DomainKey::new("globex.example.com"))
            .await
            .unwrap();
        assert!(old.is_none());

        let new = lookup.find_by_domain(&DomainKey::new("globex.com")).await.unwrap();
        assert_eq!(new.map(|t| t.name), Some("Globex".to_string()));
    }

    #[tokio::test]
    async fn test_remove() {
        let lookup = lookup();
        assert!(lookup.remove(TenantId(1)).is_some());
        assert!(lookup.remove(TenantId(1)).is_none());
        assert_eq!(lookup.len(), 1);

        let gone = lookup.find_by_domain(&DomainKey::new("acme.io")).await.unwrap();
        assert!(gone.is_none());
    }

    #[test]
    fn test_from_json_file() {
        let path = std::env::temp_dir().join(format!("tenantry-tenants-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"[{"id": 3, "name": "Initech", "domain": "initech.com", "aliases": ["initech.net"]}]"#,
        )
        .unwrap();

        let lookup = StaticTenantLookup::from_json_file(DomainNormalizer::default(), &path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(lookup.get(TenantId(3)).map(|t| t.aliases.len()), Some(1));
    }

    #[test]
    fn test_from_json_file_reports_errors() {
        let missing = Path::new("/nonexistent/tenants.json");
        let err = StaticTenantLookup::from_json_file(DomainNormalizer::default(), missing);
        assert!(matches!(err, Err(LookupError::Unavailable(_))));
    }

    #[test]
    fn test_sqlx_pool_timeout_is_unavailable() {
        let err: LookupError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, LookupError::Unavailable(_)));
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_pg_lookup() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = tenantry_shared::create_pool(&url, 1).await.expect("Failed to create pool");
        let lookup = PgTenantLookup::new(pool);
        let result = lookup
            .find_by_domain(&DomainKey::new("example.com"))
            .await
            .expect("lookup should succeed");
        println!("example.com -> {:?}", result.map(|t| t.id));
    }
}
