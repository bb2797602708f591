//! Health check endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub completion_backend: String,
    pub store: String,
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    // Check completion backend connectivity
    let backend_status = if state.relay.is_reachable().await {
        "healthy"
    } else {
        "unhealthy"
    };

    let overall_status = if backend_status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        overall_status,
        Json(HealthResponse {
            status: backend_status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            completion_backend: backend_status.to_string(),
            store: state.store.backend().to_string(),
        }),
    )
}

/// Liveness probe (just returns 200 if the server is running)
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe (the gateway is useless without its completion backend)
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.relay.is_reachable().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
