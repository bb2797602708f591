//! AI message persistence
//!
//! The gateway never owns tickets; it only appends AI conversation turns to
//! them and reads them back. Writes happen after streaming completes and are
//! never a precondition for it.

mod memory;
mod postgres;

pub use memory::InMemoryAiMessageStore;
pub use postgres::PgAiMessageStore;

use async_trait::async_trait;
use ticketdesk_shared::{AiMessage, ChatRole, StoreResult, TicketId};
use uuid::Uuid;

/// A conversation turn to append to a ticket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAiMessage {
    pub ticket_id: TicketId,
    pub role: ChatRole,
    pub content: String,
    pub user_id: Option<Uuid>,
}

impl NewAiMessage {
    pub fn new(ticket_id: TicketId, role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            ticket_id,
            role,
            content: content.into(),
            user_id: None,
        }
    }
}

/// Storage for AI conversation turns attached to tickets
#[async_trait]
pub trait AiMessageStore: Send + Sync {
    /// Append one turn and return the stored row
    async fn create_ai_message(&self, message: NewAiMessage) -> StoreResult<AiMessage>;

    /// All turns of a ticket, oldest first
    async fn get_ai_messages(&self, ticket_id: TicketId) -> StoreResult<Vec<AiMessage>>;

    /// Delete all turns of a ticket, returning how many were removed
    async fn clear_ai_messages(&self, ticket_id: TicketId) -> StoreResult<u64>;

    /// Backend name for logs and stats
    fn backend(&self) -> &'static str;
}

/// Persist a sequence of turns in order, stopping at the first failure
pub async fn persist_turns(
    store: &dyn AiMessageStore,
    ticket_id: TicketId,
    turns: impl IntoIterator<Item = (ChatRole, String)>,
) -> StoreResult<usize> {
    let mut count = 0;
    for (role, content) in turns {
        store
            .create_ai_message(NewAiMessage::new(ticket_id, role, content))
            .await?;
        count += 1;
    }
    Ok(count)
}
