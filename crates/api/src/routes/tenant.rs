//! Current tenant

use axum::{extract::State, Extension, Json};
use serde::Serialize;
use tenantry_shared::Tenant;

use crate::{
    error::ApiResult,
    routing::{ResolutionType, ResolvedTenant},
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct CurrentTenantResponse {
    pub tenant: Tenant,
    pub matched: String,
    pub resolution_type: ResolutionType,
    pub is_canonical: bool,
    /// Same request on the canonical domain, for alias hosts
    pub canonical_url: Option<String>,
}

/// Tenant the request's Host resolved to
pub async fn current_tenant(
    State(state): State<AppState>,
    Extension(resolved): Extension<ResolvedTenant>,
) -> ApiResult<Json<CurrentTenantResponse>> {
    // Read through the context the middleware installed
    let tenant = state
        .resolver
        .context()
        .get()
        .unwrap_or_else(|| resolved.tenant.clone());

    let canonical_url = (!resolved.is_canonical).then(|| resolved.canonical_url_for("https", "/"));

    Ok(Json(CurrentTenantResponse {
        tenant: (*tenant).clone(),
        matched: resolved.matched.to_string(),
        resolution_type: resolved.resolution_type,
        is_canonical: resolved.is_canonical,
        canonical_url,
    }))
}
