//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tenantry_shared::TenantError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Tenant resolution
    #[error("No tenant found for host: {0}")]
    TenantNotFound(String),
    #[error("Tenant resolution unavailable")]
    ResolutionUnavailable(String),
    #[error("Configuration error: {0}")]
    Configuration(String),

    // Authentication
    #[error("Authentication required")]
    Unauthorized,

    // Validation
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Internal
    #[error("Service unavailable")]
    ServiceUnavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Tenant resolution
            ApiError::TenantNotFound(_) => (StatusCode::NOT_FOUND, "TENANT_NOT_FOUND", self.to_string()),
            ApiError::ResolutionUnavailable(reason) => {
                tracing::warn!(reason = %reason, "Tenant resolution unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, "RESOLUTION_UNAVAILABLE", self.to_string())
            }
            ApiError::Configuration(_) => {
                tracing::error!(error = %self, "Configuration error while serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, "CONFIGURATION_ERROR", "Server is misconfigured".to_string())
            }

            // Authentication
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),

            // Validation
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            // Internal
            ApiError::ServiceUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", self.to_string()),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<TenantError> for ApiError {
    fn from(err: TenantError) -> Self {
        match err {
            TenantError::NotFound(host) => ApiError::TenantNotFound(host),
            TenantError::ResolutionUnavailable(reason) => ApiError::ResolutionUnavailable(reason),
            TenantError::Configuration(reason) => ApiError::Configuration(reason),
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_tenant_error_mapping() {
        let cases = [
            (TenantError::NotFound("acme.com".into()), StatusCode::NOT_FOUND, "TENANT_NOT_FOUND"),
            (
                TenantError::ResolutionUnavailable("db down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
                "RESOLUTION_UNAVAILABLE",
            ),
            (
                TenantError::Configuration("no default".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIGURATION_ERROR",
            ),
        ];

        for (err, status, code) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), status);
            assert_eq!(body_json(response).await["error"]["code"], code);
        }
    }

    #[tokio::test]
    async fn test_unavailable_reason_is_not_exposed() {
        let response = ApiError::ResolutionUnavailable("password authentication failed".into()).into_response();
        let body = body_json(response).await;
        assert_eq!(body["error"]["message"], "Tenant resolution unavailable");
    }
}
