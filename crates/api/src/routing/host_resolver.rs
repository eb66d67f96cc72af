//! Host-to-Tenant Resolution
//!
//! Resolves incoming Host headers to tenants for request routing.
//! A host is normalized, looked up in the resolution cache and, on a miss,
//! each candidate key is tried against the tenant lookup in order:
//! - Alias table: localhost -> default.example.com
//! - Exact host: shop.acme.com
//! - Registrable domain: acme.com
//! - Wildcards (opt-in): *.acme.com, *.com, *

use std::sync::Arc;

use serde::Serialize;
use tenantry_shared::{DomainKey, SharedTenant, TenantError, TenantId, TenantResult};

use super::cache::{CacheConfig, Resolution, ResolutionCache};
use super::context::CurrentTenantContext;
use super::invalidator::CacheInvalidator;
use super::lookup::{LookupError, TenantLookup};
use super::normalizer::{Candidate, DomainNormalizer, NormalizerConfig, ResolutionType};

/// Result of resolving a host to a tenant
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedTenant {
    /// Immutable tenant snapshot
    pub tenant: SharedTenant,
    /// The candidate key that matched
    pub matched: DomainKey,
    /// How the host was resolved
    pub resolution_type: ResolutionType,
    /// Whether the request host is the tenant's canonical domain
    pub is_canonical: bool,
}

impl ResolvedTenant {
    /// URL on the tenant's canonical domain, for redirecting alias hosts
    pub fn canonical_url_for(&self, scheme: &str, path_and_query: &str) -> String {
        let path = if path_and_query.starts_with('/') {
            path_and_query.to_string()
        } else {
            format!("/{}", path_and_query)
        };
        format!("{}://{}{}", scheme, self.tenant.domain, path)
    }
}

/// Resolver settings
#[derive(Debug, Clone, Default)]
pub struct ResolverConfig {
    pub normalizer: NormalizerConfig,
    pub cache: CacheConfig,
    /// Fallback tenant for contexts without a resolvable host
    pub default_tenant_id: Option<TenantId>,
    /// Domain resolved once at startup into the default tenant id
    pub default_tenant_domain: Option<String>,
}

/// Host resolver with caching
#[derive(Clone)]
pub struct HostResolver {
    lookup: Arc<dyn TenantLookup>,
    normalizer: Arc<DomainNormalizer>,
    cache: Arc<ResolutionCache>,
    context: CurrentTenantContext,
}

impl HostResolver {
    /// Create a new host resolver. The default tenant is taken from
    /// `default_tenant_id` only; use [`HostResolver::bootstrap`] to also
    /// resolve `default_tenant_domain`.
    pub fn new(lookup: Arc<dyn TenantLookup>, config: ResolverConfig) -> Self {
        let cache = Arc::new(ResolutionCache::new(config.cache));
        Self::with_cache(lookup, config.normalizer, cache, config.default_tenant_id)
    }

    /// Create a new host resolver with a shared cache
    pub fn with_cache(
        lookup: Arc<dyn TenantLookup>,
        normalizer: NormalizerConfig,
        cache: Arc<ResolutionCache>,
        default_tenant_id: Option<TenantId>,
    ) -> Self {
        Self {
            lookup,
            normalizer: Arc::new(DomainNormalizer::new(normalizer)),
            cache,
            context: CurrentTenantContext::new(default_tenant_id),
        }
    }

    /// Create a resolver and settle the default tenant.
    ///
    /// `default_tenant_id` wins when both are set. A configured
    /// `default_tenant_domain` that does not resolve is a fatal
    /// configuration error.
    pub async fn bootstrap(
        lookup: Arc<dyn TenantLookup>,
        config: ResolverConfig,
    ) -> TenantResult<Self> {
        let default_domain = config.default_tenant_domain.clone();
        let mut resolver = Self::new(lookup, config);

        if resolver.context.default_tenant_id().is_ok() {
            return Ok(resolver);
        }

        if let Some(domain) = default_domain {
            let resolved = resolver.resolve(&domain).await.map_err(|e| match e {
                TenantError::NotFound(_) => TenantError::Configuration(format!(
                    "default tenant domain {:?} does not resolve to a tenant",
                    domain
                )),
                other => other,
            })?;

            tracing::info!(
                domain = %domain,
                tenant_id = %resolved.tenant.id,
                "Default tenant resolved"
            );
            resolver.context = CurrentTenantContext::new(Some(resolved.tenant.id));
        }

        Ok(resolver)
    }

    /// Resolve a host header to a tenant
    ///
    /// Returns:
    /// - Ok(ResolvedTenant) if the host resolved to a tenant
    /// - Err(NotFound) if no tenant owns the host (cached negative)
    /// - Err(ResolutionUnavailable) if the lookup failed (not cached)
    pub async fn resolve(&self, raw_host: &str) -> TenantResult<ResolvedTenant> {
        let normalized = self.normalizer.normalize(raw_host);

        if normalized.key.is_empty() {
            return Err(TenantError::NotFound(raw_host.to_string()));
        }

        let lookup = Arc::clone(&self.lookup);
        let normalizer = Arc::clone(&self.normalizer);
        let candidates = normalized.candidates;

        let resolution = self
            .cache
            .resolve(&normalized.key, move |key| async move {
                load_candidates(lookup.as_ref(), &normalizer, &key, &candidates).await
            })
            .await?;

        match resolution {
            Resolution::Found(resolved) => Ok(resolved),
            Resolution::NotFound => Err(TenantError::NotFound(normalized.key.to_string())),
        }
    }

    /// Request entry hook: resolve the host and install the tenant as the
    /// current tenant. On failure the current tenant is cleared.
    ///
    /// Runtime callers must be inside [`CurrentTenantContext::scope`];
    /// otherwise this fails with `Configuration` before resolving.
    pub async fn begin_request(&self, raw_host: &str) -> TenantResult<ResolvedTenant> {
        if !self.context.has_scope() {
            return Err(TenantError::Configuration(
                "begin_request called outside a tenant context scope".to_string(),
            ));
        }

        match self.resolve(raw_host).await {
            Ok(resolved) => {
                self.context.set(Arc::clone(&resolved.tenant));
                Ok(resolved)
            }
            Err(e) => {
                self.context.clear();
                Err(e)
            }
        }
    }

    /// Request exit hook: clear the current tenant
    pub fn end_request(&self) {
        self.context.clear();
    }

    /// Invalidator wired to this resolver's cache and normalizer
    pub fn invalidator(&self) -> CacheInvalidator {
        CacheInvalidator::new(Arc::clone(&self.cache), Arc::clone(&self.normalizer))
    }

    /// Invalidate cache for a specific host
    pub fn invalidate_host(&self, raw_host: &str) -> bool {
        let key = self.normalizer.normalize_key(raw_host);
        self.cache.invalidate(&key)
    }

    /// Invalidate all cached entries for a tenant
    pub fn invalidate_tenant(&self, tenant_id: TenantId) -> usize {
        self.cache.invalidate_tenant(tenant_id)
    }

    /// Get the resolution cache for statistics/management
    pub fn cache(&self) -> &Arc<ResolutionCache> {
        &self.cache
    }

    pub fn normalizer(&self) -> &DomainNormalizer {
        &self.normalizer
    }

    pub fn context(&self) -> &CurrentTenantContext {
        &self.context
    }
}

/// Try each candidate in precedence order; the first hit wins
async fn load_candidates(
    lookup: &dyn TenantLookup,
    normalizer: &DomainNormalizer,
    requested: &DomainKey,
    candidates: &[Candidate],
) -> Result<Resolution, LookupError> {
    for candidate in candidates {
        if let Some(tenant) = lookup.find_by_domain(&candidate.key).await? {
            let is_canonical = normalizer.canonical(&tenant.domain) == *requested;

            tracing::debug!(
                host = %requested,
                matched = %candidate.key,
                tenant_id = %tenant.id,
                resolution_type = ?candidate.kind,
                "Host resolved"
            );

            return Ok(Resolution::Found(ResolvedTenant {
                tenant: Arc::new(tenant),
                matched: candidate.key.clone(),
                resolution_type: candidate.kind,
                is_canonical,
            }));
        }
    }

    tracing::debug!(host = %requested, "Host does not resolve to any tenant");
    Ok(Resolution::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::lookup::StaticTenantLookup;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tenantry_shared::Tenant;

    fn normalizer_config() -> NormalizerConfig {
        NormalizerConfig::default().with_extra_host("localhost", "default.example.com")
    }

    fn static_lookup() -> Arc<StaticTenantLookup> {
        Arc::new(StaticTenantLookup::with_tenants(
            DomainNormalizer::new(normalizer_config()),
            [
                Tenant::new(1, "Default", "default.example.com"),
                Tenant::new(2, "A", "a.example.com"),
                Tenant::new(3, "B", "b.example.com"),
                Tenant::new(4, "C", "c.example.com"),
                Tenant::new(5, "Acme", "acme.com").with_alias("acme.io"),
            ],
        ))
    }

    fn resolver_with(lookup: Arc<StaticTenantLookup>, max_entries: usize) -> HostResolver {
        HostResolver::new(
            lookup,
            ResolverConfig {
                normalizer: normalizer_config(),
                cache: CacheConfig::default().with_max_entries(max_entries),
                ..Default::default()
            },
        )
    }

    /// Lookup that fails while `down` is set
    struct FlakyLookup {
        inner: Arc<StaticTenantLookup>,
        down: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TenantLookup for FlakyLookup {
        async fn find_by_domain(&self, domain: &DomainKey) -> Result<Option<Tenant>, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                return Err(LookupError::Unavailable("database is down".into()));
            }
            self.inner.find_by_domain(domain).await
        }
    }

    #[tokio::test]
    async fn test_alias_and_lru_scenario() {
        let lookup = static_lookup();
        let resolver = resolver_with(Arc::clone(&lookup), 2);

        let resolved = resolver.resolve("localhost").await.unwrap();
        assert_eq!(resolved.tenant.id, TenantId(1));
        assert_eq!(resolved.resolution_type, ResolutionType::ExtraHost);

        for host in ["a.example.com", "b.example.com", "c.example.com"] {
            resolver.resolve(host).await.unwrap();
        }

        assert_eq!(
            resolver.cache().keys(),
            vec![DomainKey::new("b.example.com"), DomainKey::new("c.example.com")]
        );
    }

    #[tokio::test]
    async fn test_port_and_case_variants_share_one_load() {
        let lookup = static_lookup();
        let resolver = resolver_with(Arc::clone(&lookup), 100);

        let first = resolver.resolve("Acme.COM:8443").await.unwrap();
        let second = resolver.resolve("acme.com").await.unwrap();

        assert!(Arc::ptr_eq(&first.tenant, &second.tenant));
        assert_eq!(lookup.lookup_count(), 1);
        assert!(first.is_canonical);
    }

    #[tokio::test]
    async fn test_alias_domain_is_not_canonical() {
        let resolver = resolver_with(static_lookup(), 100);

        let resolved = resolver.resolve("www.acme.io").await.unwrap();
        assert_eq!(resolved.tenant.id, TenantId(5));
        assert!(!resolved.is_canonical);
        assert_eq!(
            resolved.canonical_url_for("https", "/pricing?plan=pro"),
            "https://acme.com/pricing?plan=pro"
        );
    }

    #[tokio::test]
    async fn test_registrable_domain_fallback() {
        let lookup = static_lookup();
        let resolver = resolver_with(Arc::clone(&lookup), 100);

        let resolved = resolver.resolve("shop.acme.com").await.unwrap();
        assert_eq!(resolved.tenant.id, TenantId(5));
        assert_eq!(resolved.matched.as_str(), "acme.com");
        assert_eq!(resolved.resolution_type, ResolutionType::RegistrableDomain);
        // exact host, then registrable domain
        assert_eq!(lookup.lookup_count(), 2);

        // Cached under the requested host
        resolver.resolve("shop.acme.com").await.unwrap();
        assert_eq!(lookup.lookup_count(), 2);
    }

    #[tokio::test]
    async fn test_wildcard_alias() {
        let lookup = Arc::new(StaticTenantLookup::with_tenants(
            DomainNormalizer::default(),
            [Tenant::new(9, "Catch-all", "hosted.example.net").with_alias("*.example.net")],
        ));
        let resolver = HostResolver::new(
            lookup,
            ResolverConfig {
                normalizer: NormalizerConfig::default().with_wildcard_aliases(true),
                ..Default::default()
            },
        );

        let resolved = resolver.resolve("anything.example.net").await.unwrap();
        assert_eq!(resolved.tenant.id, TenantId(9));
        assert_eq!(resolved.resolution_type, ResolutionType::Wildcard);
    }

    #[tokio::test]
    async fn test_unknown_host_is_not_found_and_cached() {
        let lookup = static_lookup();
        let resolver = resolver_with(Arc::clone(&lookup), 100);

        let err = resolver.resolve("initech.com").await.unwrap_err();
        assert_eq!(err, TenantError::NotFound("initech.com".to_string()));

        let calls = lookup.lookup_count();
        let err = resolver.resolve("INITECH.com").await.unwrap_err();
        assert!(matches!(err, TenantError::NotFound(_)));
        assert_eq!(lookup.lookup_count(), calls);
    }

    #[tokio::test]
    async fn test_empty_host_is_not_found_without_lookup() {
        let lookup = static_lookup();
        let resolver = resolver_with(Arc::clone(&lookup), 100);

        assert!(matches!(resolver.resolve("").await, Err(TenantError::NotFound(_))));
        assert_eq!(lookup.lookup_count(), 0);
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_lookup_is_retried() {
        let flaky = Arc::new(FlakyLookup {
            inner: static_lookup(),
            down: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        });
        let resolver = HostResolver::new(
            Arc::clone(&flaky) as Arc<dyn TenantLookup>,
            ResolverConfig::default(),
        );

        let err = resolver.resolve("acme.com").await.unwrap_err();
        assert!(matches!(err, TenantError::ResolutionUnavailable(_)));
        assert!(err.is_transient());

        flaky.down.store(false, Ordering::SeqCst);
        let resolved = resolver.resolve("acme.com").await.unwrap();
        assert_eq!(resolved.tenant.id, TenantId(5));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_begin_request_requires_a_scope() {
        let resolver = resolver_with(static_lookup(), 100);

        let err = resolver.begin_request("acme.com").await.unwrap_err();
        assert!(matches!(err, TenantError::Configuration(_)));

        let other = resolver.clone();
        let seen = tokio::spawn(async move { other.context().get() }).await.unwrap();
        assert!(seen.is_none());
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_request_hooks_set_and_clear_context() {
        let resolver = resolver_with(static_lookup(), 100);

        resolver
            .context()
            .scope(async {
                let resolved = resolver.begin_request("acme.com").await.unwrap();
                let current = resolver.context().get().unwrap();
                assert!(Arc::ptr_eq(&current, &resolved.tenant));

                resolver.end_request();
                assert!(resolver.context().get().is_none());

                resolver.context().set(current);
                assert!(resolver.begin_request("initech.com").await.is_err());
                assert!(resolver.context().get().is_none());
            })
            .await;
    }

    #[tokio::test]
    async fn test_bootstrap_default_tenant() {
        let resolver = HostResolver::bootstrap(
            static_lookup(),
            ResolverConfig {
                default_tenant_domain: Some("acme.com".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(resolver.context().default_tenant_id(), Ok(TenantId(5)));

        // Explicit id wins over the domain
        let resolver = HostResolver::bootstrap(
            static_lookup(),
            ResolverConfig {
                default_tenant_id: Some(TenantId(2)),
                default_tenant_domain: Some("acme.com".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(resolver.context().default_tenant_id(), Ok(TenantId(2)));
    }

    #[tokio::test]
    async fn test_bootstrap_unknown_default_domain_is_configuration_error() {
        let result = HostResolver::bootstrap(
            static_lookup(),
            ResolverConfig {
                default_tenant_domain: Some("nowhere.example.org".into()),
                ..Default::default()
            },
        )
        .await;

        assert!(matches!(result, Err(TenantError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_invalidate_host_uses_normalized_key() {
        let resolver = resolver_with(static_lookup(), 100);
        resolver.resolve("acme.com").await.unwrap();

        assert!(resolver.invalidate_host("WWW.ACME.COM:443"));
        assert!(resolver.cache().is_empty());
        assert!(!resolver.invalidate_host("acme.com"));
    }
}
