//! Error types for Tenantry

use thiserror::Error;

/// Outcome of a failed tenant resolution.
///
/// `Clone` so one failed load can be handed to every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TenantError {
    /// The lookup completed and no tenant owns this host
    #[error("No tenant found for host: {0}")]
    NotFound(String),

    /// The lookup could not complete (backing store down, timeout)
    #[error("Tenant resolution unavailable: {0}")]
    ResolutionUnavailable(String),

    /// Missing or invalid configuration, such as no default tenant
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TenantError {
    /// Transient failures are worth retrying; the others are definitive
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ResolutionUnavailable(_))
    }
}

pub type TenantResult<T> = Result<T, TenantError>;
