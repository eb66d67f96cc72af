//! Host-based tenant routing
//!
//! This module resolves incoming Host headers to tenants:
//! - Normalization: Shop.Acme.com:8443 -> shop.acme.com (+ acme.com)
//! - Caching: bounded LRU with TTLs, negative entries and single-flight loads
//! - Invalidation: tenant mutations evict affected entries
//! - Context: the resolved tenant is readable for the rest of the request

mod cache;
mod context;
mod events;
mod host_resolver;
mod invalidator;
mod lookup;
mod normalizer;
mod singleflight;

pub use cache::{
    CacheConfig, CacheStats, Resolution, ResolutionCache, DEFAULT_CACHE_TTL, DEFAULT_MAX_ENTRIES,
    DEFAULT_NOTFOUND_TTL,
};
pub use context::CurrentTenantContext;
pub use events::{
    decode_event, publish_event, EventError, TenantEventListener, DEFAULT_EVENTS_CHANNEL,
};
pub use host_resolver::{HostResolver, ResolvedTenant, ResolverConfig};
pub use invalidator::{CacheInvalidator, TenantEvent};
pub use lookup::{LookupError, PgTenantLookup, StaticTenantLookup, TenantLookup};
pub use normalizer::{Candidate, DomainNormalizer, NormalizedHost, NormalizerConfig, ResolutionType};
