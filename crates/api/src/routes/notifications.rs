//! Ticket event publishing
//!
//! Lets collaborators outside this process push `new_comment` /
//! `ticket_update` events to subscribed notification sockets.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ticketdesk_shared::TicketId;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct PublishEventRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub struct PublishEventResponse {
    pub delivered: usize,
}

/// `POST /api/tickets/:ticket_id/events`
pub async fn publish_event(
    State(state): State<AppState>,
    Path(ticket_id): Path<i64>,
    Json(req): Json<PublishEventRequest>,
) -> ApiResult<Json<PublishEventResponse>> {
    let event_type = req.event_type.trim();
    if event_type.is_empty() {
        return Err(ApiError::Validation("Event type must not be empty".to_string()));
    }

    let delivered = state
        .fanout
        .notify_event(TicketId(ticket_id), event_type, req.data)
        .await;

    Ok(Json(PublishEventResponse { delivered }))
}
