//! Ingress error type and its HTTP mapping

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Ingress error types
#[derive(Debug, Error)]
pub enum IngressError {
    /// Body was not valid JSON for the route
    #[error("Invalid JSON body: {0}")]
    InvalidJson(String),

    /// Request body over the configured limit
    #[error("Request body too large")]
    PayloadTooLarge,

    /// Fixed-window limit exceeded for this client and route
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngressError {
    /// Machine-readable code sent as the `error` field
    pub fn code(&self) -> &'static str {
        match self {
            IngressError::InvalidJson(_) => "invalid_json",
            IngressError::PayloadTooLarge => "payload_too_large",
            IngressError::RateLimited { .. } => "rate_limited",
            IngressError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            IngressError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            IngressError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            IngressError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            IngressError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        match self {
            IngressError::RateLimited { retry_after_secs } => {
                let body = serde_json::json!({
                    "error": code,
                    "retryAfter": retry_after_secs,
                });
                let mut response = (status, Json(body)).into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
                response
            }
            IngressError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error while handling request");
                (status, Json(serde_json::json!({ "error": code }))).into_response()
            }
            other => {
                let body = serde_json::json!({
                    "error": code,
                    "message": other.to_string(),
                });
                (status, Json(body)).into_response()
            }
        }
    }
}
