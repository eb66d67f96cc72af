//! API routes

pub mod admin;
pub mod health;
pub mod tenant;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};

use crate::{
    middleware::{require_admin, resolve_tenant},
    state::AppState,
};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Tenant-scoped API routes - under /api/v1
    let tenant_routes = Router::new()
        .route("/tenant", get(tenant::current_tenant))
        .layer(middleware::from_fn_with_state(state.clone(), resolve_tenant));

    // Cache administration (bearer token when ADMIN_TOKEN is set)
    let admin_routes = Router::new()
        .route("/cache/stats", get(admin::cache_stats))
        .route("/cache/flush", post(admin::flush_cache))
        .route("/cache/invalidate", post(admin::invalidate_cache))
        .layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", tenant_routes)
        .nest("/admin", admin_routes)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .with_state(state)
}
