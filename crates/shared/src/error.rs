//! Error types for Ticketdesk

use thiserror::Error;

/// Errors raised by the AI message store collaborators
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Unknown chat role: {0}")]
    InvalidRole(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".to_string()),
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
