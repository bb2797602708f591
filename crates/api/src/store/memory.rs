//! Process-local message store used when no database is configured

use std::collections::HashMap;

use async_trait::async_trait;
use ticketdesk_shared::{AiMessage, StoreResult, TicketId};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AiMessageStore, NewAiMessage};

#[derive(Default)]
pub struct InMemoryAiMessageStore {
    messages: RwLock<HashMap<TicketId, Vec<AiMessage>>>,
}

impl InMemoryAiMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AiMessageStore for InMemoryAiMessageStore {
    async fn create_ai_message(&self, message: NewAiMessage) -> StoreResult<AiMessage> {
        let stored = AiMessage {
            id: Uuid::new_v4(),
            ticket_id: message.ticket_id,
            role: message.role,
            content: message.content,
            user_id: message.user_id,
            created_at: OffsetDateTime::now_utc(),
        };

        self.messages
            .write()
            .await
            .entry(stored.ticket_id)
            .or_default()
            .push(stored.clone());

        Ok(stored)
    }

    async fn get_ai_messages(&self, ticket_id: TicketId) -> StoreResult<Vec<AiMessage>> {
        let messages = self.messages.read().await;
        Ok(messages.get(&ticket_id).cloned().unwrap_or_default())
    }

    async fn clear_ai_messages(&self, ticket_id: TicketId) -> StoreResult<u64> {
        let removed = self.messages.write().await.remove(&ticket_id);
        Ok(removed.map(|m| m.len() as u64).unwrap_or(0))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
