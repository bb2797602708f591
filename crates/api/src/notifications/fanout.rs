use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use ticketdesk_shared::TicketId;

use crate::websocket::events::OutboundFrame;
use crate::websocket::registry::ConnectionRegistry;

/// A comment was added to the ticket
pub const NEW_COMMENT: &str = "new_comment";

/// Ticket fields (status, assignee, ...) changed
pub const TICKET_UPDATE: &str = "ticket_update";

/// Envelope delivered to notification subscribers
#[derive(Debug, Clone, Serialize)]
pub struct NotificationEvent<'a> {
    #[serde(rename = "type")]
    pub event_type: &'a str,
    #[serde(rename = "ticketId")]
    pub ticket_id: TicketId,
    pub data: &'a Value,
}

/// Pushes ticket events to subscribed connections
#[derive(Clone)]
pub struct NotificationFanout {
    registry: Arc<ConnectionRegistry>,
}

impl NotificationFanout {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver an event to every subscriber of `ticket_id`
    ///
    /// The envelope is serialized once and shared between subscribers.
    /// Returns how many connections received it; zero subscribers is not an
    /// error.
    pub async fn notify_event(&self, ticket_id: TicketId, event_type: &str, payload: Value) -> usize {
        if self.registry.topic_size(&ticket_id).await == 0 {
            tracing::debug!(ticket_id = %ticket_id, event_type, "No subscribers, skipping notification");
            return 0;
        }

        let envelope = NotificationEvent {
            event_type,
            ticket_id,
            data: &payload,
        };
        let json = match serde_json::to_string(&envelope) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = ?e, ticket_id = %ticket_id, "Failed to serialize notification");
                return 0;
            }
        };

        let delivered = self
            .registry
            .broadcast(&ticket_id, OutboundFrame::Notification(Arc::from(json)))
            .await;

        tracing::info!(ticket_id = %ticket_id, event_type, delivered, "Ticket notification sent");
        delivered
    }

    pub async fn notify_new_comment(&self, ticket_id: TicketId, comment: Value) -> usize {
        self.notify_event(ticket_id, NEW_COMMENT, comment).await
    }

    pub async fn notify_ticket_update(&self, ticket_id: TicketId, changes: Value) -> usize {
        self.notify_event(ticket_id, TICKET_UPDATE, changes).await
    }
}
