//! Resolution cache administration

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tenantry_shared::TenantId;

use crate::{
    error::{ApiError, ApiResult},
    routing::{publish_event, CacheStats, TenantEvent},
    state::AppState,
};

/// Cache statistics
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.resolver.cache().stats())
}

#[derive(Debug, Serialize)]
pub struct FlushResponse {
    /// Entries removed from this instance
    pub removed: usize,
    /// Other subscribers notified through the event feed
    pub broadcast_to: Option<usize>,
}

/// Flush the cache on this instance and, when the event feed is configured,
/// on every other instance
pub async fn flush_cache(State(state): State<AppState>) -> ApiResult<Json<FlushResponse>> {
    let removed = state.resolver.invalidator().flush_all();

    let broadcast_to = match state.events.clone() {
        Some(mut conn) => {
            let receivers = publish_event(&mut conn, &state.config.tenant_events_channel, &TenantEvent::Flushed)
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to publish cache flush");
                    ApiError::ServiceUnavailable
                })?;
            Some(receivers)
        }
        None => None,
    };

    tracing::info!(removed, ?broadcast_to, "Resolution cache flushed by admin");

    Ok(Json(FlushResponse { removed, broadcast_to }))
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub host: Option<String>,
    pub tenant_id: Option<TenantId>,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub removed: usize,
}

/// Invalidate a single host or every entry of a tenant on this instance
pub async fn invalidate_cache(
    State(state): State<AppState>,
    Json(req): Json<InvalidateRequest>,
) -> ApiResult<Json<InvalidateResponse>> {
    let removed = match (req.host.as_deref(), req.tenant_id) {
        (Some(host), None) => usize::from(state.resolver.invalidate_host(host)),
        (None, Some(tenant_id)) => state.resolver.invalidate_tenant(tenant_id),
        _ => {
            return Err(ApiError::BadRequest(
                "Provide exactly one of host or tenant_id".to_string(),
            ))
        }
    };

    tracing::info!(host = ?req.host, tenant_id = ?req.tenant_id, removed, "Cache invalidated by admin");

    Ok(Json(InvalidateResponse { removed }))
}
