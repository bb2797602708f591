//! Postgres-backed message store (`ai_messages` table)

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use ticketdesk_shared::{AiMessage, ChatRole, StoreResult, TicketId};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{AiMessageStore, NewAiMessage};

#[derive(Debug, FromRow)]
struct AiMessageRow {
    id: Uuid,
    ticket_id: i64,
    role: String,
    content: String,
    user_id: Option<Uuid>,
    created_at: OffsetDateTime,
}

impl TryFrom<AiMessageRow> for AiMessage {
    type Error = ticketdesk_shared::StoreError;

    fn try_from(row: AiMessageRow) -> Result<Self, Self::Error> {
        Ok(AiMessage {
            id: row.id,
            ticket_id: TicketId(row.ticket_id),
            role: row.role.parse::<ChatRole>()?,
            content: row.content,
            user_id: row.user_id,
            created_at: row.created_at,
        })
    }
}

#[derive(Clone)]
pub struct PgAiMessageStore {
    pool: PgPool,
}

impl PgAiMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AiMessageStore for PgAiMessageStore {
    async fn create_ai_message(&self, message: NewAiMessage) -> StoreResult<AiMessage> {
        let row = sqlx::query_as::<_, AiMessageRow>(
            r#"
            INSERT INTO ai_messages (id, ticket_id, role, content, user_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, ticket_id, role, content, user_id, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(message.ticket_id.0)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.user_id)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get_ai_messages(&self, ticket_id: TicketId) -> StoreResult<Vec<AiMessage>> {
        let rows = sqlx::query_as::<_, AiMessageRow>(
            r#"
            SELECT id, ticket_id, role, content, user_id, created_at
            FROM ai_messages
            WHERE ticket_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(ticket_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AiMessage::try_from).collect()
    }

    async fn clear_ai_messages(&self, ticket_id: TicketId) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM ai_messages WHERE ticket_id = $1")
            .bind(ticket_id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_round_trip_against_database() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = ticketdesk_shared::db::create_pool(&url, 2).await.unwrap();
        ticketdesk_shared::db::run_migrations(&pool).await.unwrap();
        let store = PgAiMessageStore::new(pool);
        let ticket = TicketId(i64::from(rand_suffix()));

        store
            .create_ai_message(NewAiMessage::new(ticket, ChatRole::User, "hello"))
            .await
            .unwrap();
        let messages = store.get_ai_messages(ticket).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(store.clear_ai_messages(ticket).await.unwrap(), 1);
    }

    fn rand_suffix() -> u32 {
        Uuid::new_v4().as_u128() as u32
    }
}
