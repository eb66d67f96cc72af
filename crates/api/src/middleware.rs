//! Request middleware: tenant resolution and admin authentication

use axum::{
    extract::{Request, State},
    http::header::{AUTHORIZATION, HOST},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::{error::ApiError, state::AppState};

/// Resolve the request's Host to a tenant and make it current for the
/// handler. The resolved tenant is also available as an
/// `Extension<ResolvedTenant>`.
pub async fn resolve_tenant(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let host = request_host(&request);
    let resolver = state.resolver;
    let context = resolver.context().clone();

    context
        .scope(async move {
            let resolved = resolver.begin_request(&host).await?;

            tracing::debug!(
                host = %host,
                tenant_id = %resolved.tenant.id,
                "Request bound to tenant"
            );

            request.extensions_mut().insert(resolved);
            let response = next.run(request).await;
            resolver.end_request();
            Ok::<Response, ApiError>(response)
        })
        .await
}

/// Host header, falling back to the URI authority (HTTP/2)
fn request_host(request: &Request) -> String {
    request
        .headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| request.uri().authority().map(|a| a.as_str()))
        .unwrap_or_default()
        .to_string()
}

/// Require `Authorization: Bearer <ADMIN_TOKEN>` when an admin token is
/// configured
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = state.config.admin_token.as_deref() {
        let provided = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .unwrap_or_default();

        if !constant_time_compare(provided, expected) {
            tracing::warn!(path = %request.uri().path(), "Rejected admin request");
            return Err(ApiError::Unauthorized);
        }
    }

    Ok(next.run(request).await)
}

/// Constant-time comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        // Same amount of work as a real comparison
        let dummy = vec![0u8; a.len()];
        let _ = a.as_bytes().ct_eq(&dummy);
        return false;
    }

    a.as_bytes().ct_eq(b.as_bytes()).into()
}
