//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use ticketdesk_shared::StoreError;

use crate::ai::RelayError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    // Resource errors
    #[error("Resource not found")]
    NotFound,

    // Completion backend errors
    #[error("AI service error: {0}")]
    Upstream(String),
    #[error("AI service timed out")]
    UpstreamTimeout,

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Service unavailable")]
    ServiceUnavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Validation
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),

            // Resources
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),

            // Completion backend
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", msg.clone()),
            ApiError::UpstreamTimeout => (StatusCode::GATEWAY_TIMEOUT, "UPSTREAM_TIMEOUT", self.to_string()),

            // Internal
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", "Database error".to_string()),
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

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!("Store error: {:?}", err);
        match err {
            StoreError::NotFound(_) => ApiError::NotFound,
            StoreError::InvalidRole(role) => ApiError::Database(format!("invalid role '{role}' in storage")),
            StoreError::Database(msg) => ApiError::Database(msg),
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        tracing::warn!(error = %err, "Completion backend call failed");
        match err {
            RelayError::Timeout => ApiError::UpstreamTimeout,
            RelayError::UpstreamUnavailable(_) => ApiError::ServiceUnavailable,
            other => ApiError::Upstream(other.client_message()),
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
