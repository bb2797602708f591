//! Global WebSocket state management
//!
//! Maintains global state for all gateway connections and ticket topics.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::{Connection, ConnectionMode};
use super::registry::ConnectionRegistry;

/// Global WebSocket state shared across all connections
#[derive(Clone, Default)]
pub struct WebSocketState {
    /// All active connections indexed by session_id
    connections: Arc<RwLock<HashMap<Uuid, Arc<Connection>>>>,

    /// Topic registry for ticket notifications
    pub registry: Arc<ConnectionRegistry>,
}

impl WebSocketState {
    /// Create new WebSocket state
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection
    pub async fn add_connection(&self, conn: Connection) -> Arc<Connection> {
        let conn = Arc::new(conn);
        let mut connections = self.connections.write().await;
        connections.insert(conn.session_id, Arc::clone(&conn));

        tracing::info!(
            session_id = %conn.session_id,
            mode = %conn.mode,
            total_connections = connections.len(),
            "WebSocket connection added"
        );

        conn
    }

    /// Remove a connection and drop it from any ticket topic
    pub async fn remove_connection(&self, session_id: &Uuid) {
        let removed = self.connections.write().await.remove(session_id);
        self.registry.remove_connection(session_id).await;

        if let Some(conn) = removed {
            tracing::info!(
                session_id = %session_id,
                mode = %conn.mode,
                "WebSocket connection removed"
            );
        }
    }

    /// Get total number of active connections
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Get statistics about the WebSocket state
    pub async fn get_stats(&self) -> WebSocketStats {
        let (active_connections, chat_connections) = {
            let connections = self.connections.read().await;
            let chat = connections
                .values()
                .filter(|c| c.mode != ConnectionMode::Notifications)
                .count();
            (connections.len(), chat)
        };

        WebSocketStats {
            active_connections,
            chat_connections,
            active_topics: self.registry.topic_count().await,
        }
    }
}

/// Statistics about WebSocket connections
#[derive(Debug, Clone, Serialize)]
pub struct WebSocketStats {
    /// Number of active connections
    pub active_connections: usize,
    /// Connections in one of the AI chat modes
    pub chat_connections: usize,
    /// Number of ticket topics with subscribers
    pub active_topics: usize,
}
