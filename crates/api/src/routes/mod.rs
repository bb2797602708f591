//! API routes

pub mod ai;
pub mod health;
pub mod notifications;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    config::Config,
    state::AppState,
    websocket::{generic_chat_ws, notifications_ws, ticket_chat_ws, triage_ws},
};

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_origin(allow_origin)
}

/// Create all gateway routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // WebSocket routes, one per connection mode
    let websocket_routes = Router::new()
        .route("/ws/tickets/:ticket_id/notifications", get(notifications_ws))
        .route("/ws/tickets/:ticket_id/chat", get(ticket_chat_ws))
        .route("/ws/chat", get(generic_chat_ws))
        .route("/ws/triage", get(triage_ws));

    let api_routes = Router::new()
        // Fanout entry point for collaborators in other processes
        .route("/tickets/:ticket_id/events", post(notifications::publish_event))
        // Persisted AI conversation turns
        .route("/tickets/:ticket_id/ai-messages", get(ai::list_ai_messages))
        .route("/tickets/:ticket_id/ai-messages", delete(ai::clear_ai_messages))
        .route("/tickets/:ticket_id/ai-session", delete(ai::reset_ai_session))
        // Completion backend administration
        .route("/ai/models", get(ai::list_models))
        .route("/ai/models/pull", post(ai::pull_model))
        .route("/gateway/stats", get(ai::gateway_stats));

    let cors = cors_layer(&state.config);

    Router::new()
        .merge(health_routes)
        .merge(websocket_routes)
        .nest("/api", api_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
