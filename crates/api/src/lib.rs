//! Tenantry API Library
//!
//! Host-to-tenant resolution core and the HTTP surface around it.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod routing;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routing::{HostResolver, ResolvedTenant, ResolverConfig};
pub use state::AppState;
