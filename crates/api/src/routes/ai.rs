//! AI history, session and model administration routes

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use ticketdesk_shared::{AiMessage, TicketId};

use crate::{
    ai::{session_cache::SessionCacheStats, types::ModelInfo},
    error::{ApiError, ApiResult},
    state::AppState,
    websocket::state::WebSocketStats,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct AiMessagesResponse {
    pub messages: Vec<AiMessage>,
}

#[derive(Debug, Serialize)]
pub struct ClearedResponse {
    pub deleted: u64,
}

#[derive(Debug, Serialize)]
pub struct SessionResetResponse {
    pub reset: bool,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
pub struct PullModelRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct PullModelResponse {
    pub model: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct GatewayStats {
    pub websocket: WebSocketStats,
    pub sessions: SessionCacheStats,
    pub store: &'static str,
}

// =============================================================================
// Handlers
// =============================================================================

/// `GET /api/tickets/:ticket_id/ai-messages`
pub async fn list_ai_messages(
    State(state): State<AppState>,
    Path(ticket_id): Path<i64>,
) -> ApiResult<Json<AiMessagesResponse>> {
    let messages = state.store.get_ai_messages(TicketId(ticket_id)).await?;
    Ok(Json(AiMessagesResponse { messages }))
}

/// `DELETE /api/tickets/:ticket_id/ai-messages`
///
/// Also drops the cached session so the next chat starts fresh.
pub async fn clear_ai_messages(
    State(state): State<AppState>,
    Path(ticket_id): Path<i64>,
) -> ApiResult<Json<ClearedResponse>> {
    let ticket_id = TicketId(ticket_id);
    let deleted = state.store.clear_ai_messages(ticket_id).await?;
    state.sessions.invalidate(ticket_id);

    tracing::info!(ticket_id = %ticket_id, deleted, "Cleared AI messages");
    Ok(Json(ClearedResponse { deleted }))
}

/// `DELETE /api/tickets/:ticket_id/ai-session`
pub async fn reset_ai_session(
    State(state): State<AppState>,
    Path(ticket_id): Path<i64>,
) -> Json<SessionResetResponse> {
    let reset = state.sessions.invalidate(TicketId(ticket_id));
    Json(SessionResetResponse { reset })
}

/// `GET /api/ai/models`
pub async fn list_models(State(state): State<AppState>) -> ApiResult<Json<ModelsResponse>> {
    let models = state.relay.list_models().await?;
    Ok(Json(ModelsResponse { models }))
}

/// `POST /api/ai/models/pull`
pub async fn pull_model(
    State(state): State<AppState>,
    Json(req): Json<PullModelRequest>,
) -> ApiResult<Json<PullModelResponse>> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("Model name must not be empty".to_string()));
    }

    let status = state.relay.pull_model(name).await?;
    Ok(Json(PullModelResponse {
        model: name.to_string(),
        status,
    }))
}

/// `GET /api/gateway/stats`
pub async fn gateway_stats(State(state): State<AppState>) -> Json<GatewayStats> {
    Json(GatewayStats {
        websocket: state.ws_state.get_stats().await,
        sessions: state.sessions.stats(),
        store: state.store.backend(),
    })
}
