//! Cache invalidation driven by tenant mutations
//!
//! Writers call the observer hooks after their write commits; remote
//! writers publish [`TenantEvent`]s that the event listener feeds through
//! [`CacheInvalidator::apply`]. Every operation is idempotent.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tenantry_shared::{DomainKey, Tenant, TenantId};

use super::cache::ResolutionCache;
use super::normalizer::DomainNormalizer;

/// Tenant mutation notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TenantEvent {
    Created {
        tenant_id: TenantId,
        domains: Vec<String>,
    },
    Updated {
        tenant_id: TenantId,
        old_domains: Vec<String>,
        new_domains: Vec<String>,
    },
    Deleted {
        tenant_id: TenantId,
        domains: Vec<String>,
    },
    /// Drop everything
    Flushed,
}

impl TenantEvent {
    pub fn created(tenant: &Tenant) -> Self {
        Self::Created {
            tenant_id: tenant.id,
            domains: owned_domains(tenant),
        }
    }

    pub fn updated(old: &Tenant, new: &Tenant) -> Self {
        Self::Updated {
            tenant_id: new.id,
            old_domains: owned_domains(old),
            new_domains: owned_domains(new),
        }
    }

    pub fn deleted(tenant: &Tenant) -> Self {
        Self::Deleted {
            tenant_id: tenant.id,
            domains: owned_domains(tenant),
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        match self {
            Self::Created { tenant_id, .. }
            | Self::Updated { tenant_id, .. }
            | Self::Deleted { tenant_id, .. } => Some(*tenant_id),
            Self::Flushed => None,
        }
    }
}

fn owned_domains(tenant: &Tenant) -> Vec<String> {
    tenant.domains().map(str::to_string).collect()
}

/// Evicts cache entries affected by tenant mutations
#[derive(Clone)]
pub struct CacheInvalidator {
    cache: Arc<ResolutionCache>,
    normalizer: Arc<DomainNormalizer>,
}

impl CacheInvalidator {
    pub fn new(cache: Arc<ResolutionCache>, normalizer: Arc<DomainNormalizer>) -> Self {
        Self { cache, normalizer }
    }

    /// Apply an event. Returns the number of entries removed.
    pub fn apply(&self, event: &TenantEvent) -> usize {
        let removed = match event {
            TenantEvent::Created { domains, .. } => self.evict_claimed_by(domains),
            TenantEvent::Updated {
                tenant_id,
                old_domains,
                new_domains,
            } => {
                let keys = self.keys_for(old_domains.iter().chain(new_domains));
                let claimed = self.claimed_scopes(new_domains);
                self.cache.invalidate_where(|key, value| {
                    value.tenant_id() == Some(*tenant_id)
                        || keys.contains(key)
                        || claimed.covers(key)
                })
            }
            TenantEvent::Deleted { tenant_id, domains } => {
                let keys = self.keys_for(domains);
                self.cache.invalidate_where(|key, value| {
                    keys.contains(key) || value.tenant_id() == Some(*tenant_id)
                })
            }
            TenantEvent::Flushed => self.cache.flush_all(),
        };

        tracing::debug!(
            tenant_id = ?event.tenant_id(),
            removed,
            "Applied tenant event to resolution cache"
        );
        removed
    }

    /// Call after a tenant write commits, before reporting the save complete
    pub fn on_tenant_saved(&self, old: Option<&Tenant>, new: &Tenant) -> usize {
        let event = match old {
            Some(old) => TenantEvent::updated(old, new),
            None => TenantEvent::created(new),
        };
        self.apply(&event)
    }

    /// Call after a tenant delete commits
    pub fn on_tenant_deleted(&self, tenant: &Tenant) -> usize {
        self.apply(&TenantEvent::deleted(tenant))
    }

    pub fn flush_all(&self) -> usize {
        self.cache.flush_all()
    }

    /// Evict every entry a new domain may now answer for. Found entries go
    /// too: a host cached through a fallback candidate (registrable domain,
    /// wildcard) loses to a tenant that owns it more specifically.
    fn evict_claimed_by(&self, domains: &[String]) -> usize {
        let keys = self.keys_for(domains);
        let claimed = self.claimed_scopes(domains);
        if keys.is_empty() && claimed.is_empty() {
            return 0;
        }
        self.cache
            .invalidate_where(|key, _| keys.contains(key) || claimed.covers(key))
    }

    /// Cache keys a set of stored domains can be cached under
    fn keys_for<'a>(&self, domains: impl IntoIterator<Item = &'a String>) -> HashSet<DomainKey> {
        let mut keys = HashSet::new();
        for domain in domains {
            keys.insert(self.normalizer.canonical(domain));
            keys.insert(self.normalizer.normalize_key(domain));
        }
        keys.retain(|key| !key.is_empty());
        keys
    }

    fn claimed_scopes(&self, domains: &[String]) -> ClaimedScopes {
        let mut scopes = ClaimedScopes::default();
        for domain in domains {
            let key = self.normalizer.canonical(domain);
            match key.as_str() {
                "" => {}
                "*" => scopes.everything = true,
                wildcard if wildcard.starts_with("*.") => {
                    scopes.parents.push(wildcard[2..].to_string())
                }
                exact => scopes.parents.push(exact.to_string()),
            }
        }
        scopes
    }
}

/// Hosts at or under a set of newly assigned domains
#[derive(Default)]
struct ClaimedScopes {
    everything: bool,
    parents: Vec<String>,
}

impl ClaimedScopes {
    fn is_empty(&self) -> bool {
        !self.everything && self.parents.is_empty()
    }

    fn covers(&self, key: &DomainKey) -> bool {
        self.everything || self.parents.iter().any(|parent| key.is_within(parent))
    }
}
