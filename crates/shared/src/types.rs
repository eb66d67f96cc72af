//! Common types used across Tenantry

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Tenant ID wrapper
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct TenantId(pub i64);

impl From<i64> for TenantId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TenantId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

// =============================================================================
// Domain Keys
// =============================================================================

/// Canonical hostname used as a cache lookup key.
///
/// Construct through the normalizer; the constructor here only wraps an
/// already-canonical string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainKey(String);

impl DomainKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if this key equals `domain` or is a subdomain of it.
    pub fn is_within(&self, domain: &str) -> bool {
        self.0 == domain
            || (self.0.len() > domain.len()
                && self.0.ends_with(domain)
                && self.0.as_bytes()[self.0.len() - domain.len() - 1] == b'.')
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DomainKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Tenants
// =============================================================================

/// A site served by this instance.
///
/// Snapshots are immutable once handed to the resolver; a changed record is
/// a new `Tenant` value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    /// Canonical domain, optionally with a port (`example.com:8000`)
    pub domain: String,
    /// Additional domains that resolve to this tenant
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl Tenant {
    pub fn new(id: impl Into<TenantId>, name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            domain: domain.into(),
            aliases: Vec::new(),
        }
    }

    /// Builder-style helper to attach an alias domain
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Every domain this tenant is reachable by, canonical first
    pub fn domains(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.domain.as_str())
            .chain(self.aliases.iter().map(String::as_str))
            .filter(|d| !d.is_empty())
    }
}

/// Shared, immutable tenant snapshot
pub type SharedTenant = Arc<Tenant>;
