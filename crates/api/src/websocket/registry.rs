//! Ticket topic registry for pub/sub
//!
//! Tracks which live connections are subscribed to which ticket. A
//! connection belongs to at most one topic; topics appear on first subscribe
//! and disappear when their last subscriber leaves.

use std::collections::HashMap;
use std::sync::Arc;

use ticketdesk_shared::TicketId;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;
use super::events::OutboundFrame;

#[derive(Default)]
struct RegistryInner {
    /// ticket_id -> (session_id -> connection)
    topics: HashMap<TicketId, HashMap<Uuid, Arc<Connection>>>,
    /// session_id -> the one topic it is subscribed to
    membership: HashMap<Uuid, TicketId>,
}

impl RegistryInner {
    fn detach(&mut self, ticket_id: &TicketId, session_id: &Uuid) -> bool {
        let Some(conns) = self.topics.get_mut(ticket_id) else {
            return false;
        };
        let removed = conns.remove(session_id).is_some();
        if removed {
            self.membership.remove(session_id);
        }
        if conns.is_empty() {
            self.topics.remove(ticket_id);
            tracing::debug!(ticket_id = %ticket_id, "Removed empty ticket topic");
        }
        removed
    }
}

/// Manages ticket topics for broadcasting events
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    /// Create a new registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a ticket topic
    ///
    /// A connection already subscribed elsewhere is moved.
    pub async fn subscribe(&self, ticket_id: TicketId, conn: Arc<Connection>) {
        let session_id = conn.session_id;
        let mut inner = self.inner.write().await;

        if let Some(previous) = inner.membership.get(&session_id).copied() {
            if previous != ticket_id {
                inner.detach(&previous, &session_id);
            }
        }

        let topic = inner.topics.entry(ticket_id).or_default();
        topic.insert(session_id, conn);
        let topic_size = topic.len();
        inner.membership.insert(session_id, ticket_id);

        tracing::debug!(
            ticket_id = %ticket_id,
            session_id = %session_id,
            topic_size,
            "Connection subscribed to ticket topic"
        );
    }

    /// Remove a connection from a ticket topic
    ///
    /// Idempotent: removing an absent connection is a no-op.
    pub async fn unsubscribe(&self, ticket_id: &TicketId, session_id: &Uuid) -> bool {
        let mut inner = self.inner.write().await;
        let removed = inner.detach(ticket_id, session_id);
        if removed {
            tracing::debug!(
                ticket_id = %ticket_id,
                session_id = %session_id,
                "Connection unsubscribed from ticket topic"
            );
        }
        removed
    }

    /// Remove a connection from whatever topic it is in
    pub async fn remove_connection(&self, session_id: &Uuid) -> Option<TicketId> {
        let mut inner = self.inner.write().await;
        let ticket_id = inner.membership.get(session_id).copied()?;
        inner.detach(&ticket_id, session_id);
        Some(ticket_id)
    }

    /// Broadcast a frame to every connection in a ticket topic
    ///
    /// Works on a snapshot of the topic. Connections whose send fails are
    /// unsubscribed without interrupting delivery to the others. Returns the
    /// number of successful deliveries.
    pub async fn broadcast(&self, ticket_id: &TicketId, frame: OutboundFrame) -> usize {
        let snapshot: Vec<Arc<Connection>> = {
            let inner = self.inner.read().await;
            match inner.topics.get(ticket_id) {
                Some(conns) => conns.values().cloned().collect(),
                None => {
                    tracing::debug!(ticket_id = %ticket_id, "No subscribers for ticket topic");
                    return 0;
                }
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for conn in &snapshot {
            match conn.send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::warn!(
                        session_id = %conn.session_id,
                        "Failed to send event to connection (likely closed)"
                    );
                    dead.push(conn.session_id);
                }
            }
        }

        for session_id in &dead {
            self.unsubscribe(ticket_id, session_id).await;
        }

        tracing::debug!(
            ticket_id = %ticket_id,
            recipients = delivered,
            failed = dead.len(),
            "Broadcast event to ticket topic"
        );
        delivered
    }

    /// Get topic size (number of connections) for a ticket
    pub async fn topic_size(&self, ticket_id: &TicketId) -> usize {
        let inner = self.inner.read().await;
        inner.topics.get(ticket_id).map(|c| c.len()).unwrap_or(0)
    }

    /// Get total number of active topics
    pub async fn topic_count(&self) -> usize {
        self.inner.read().await.topics.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::websocket::connection::ConnectionMode;
    use tokio::sync::mpsc;

    fn connection(ticket_id: TicketId) -> (Arc<Connection>, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(ConnectionMode::Notifications, Some(ticket_id), tx);
        (Arc::new(conn), rx)
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let registry = ConnectionRegistry::new();
        let ticket = TicketId(10);
        let (conn, _rx) = connection(ticket);

        assert_eq!(registry.topic_size(&ticket).await, 0);

        registry.subscribe(ticket, Arc::clone(&conn)).await;
        assert_eq!(registry.topic_size(&ticket).await, 1);

        assert!(registry.unsubscribe(&ticket, &conn.session_id).await);
        assert_eq!(registry.topic_size(&ticket).await, 0);
        assert_eq!(registry.topic_count().await, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let ticket = TicketId(11);
        let (conn, _rx) = connection(ticket);

        registry.subscribe(ticket, Arc::clone(&conn)).await;
        assert!(registry.unsubscribe(&ticket, &conn.session_id).await);
        assert!(!registry.unsubscribe(&ticket, &conn.session_id).await);
        assert!(registry.remove_connection(&conn.session_id).await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_subscribe_keeps_one_entry() {
        let registry = ConnectionRegistry::new();
        let ticket = TicketId(12);
        let (conn, _rx) = connection(ticket);

        registry.subscribe(ticket, Arc::clone(&conn)).await;
        registry.subscribe(ticket, Arc::clone(&conn)).await;
        assert_eq!(registry.topic_size(&ticket).await, 1);
    }

    #[tokio::test]
    async fn test_connection_is_in_at_most_one_topic() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = connection(TicketId(1));

        registry.subscribe(TicketId(1), Arc::clone(&conn)).await;
        registry.subscribe(TicketId(2), Arc::clone(&conn)).await;

        assert_eq!(registry.topic_size(&TicketId(1)).await, 0);
        assert_eq!(registry.topic_size(&TicketId(2)).await, 1);
        assert_eq!(registry.topic_count().await, 1);
    }

    #[tokio::test]
    async fn test_broadcast_to_topic() {
        let registry = ConnectionRegistry::new();
        let ticket = TicketId(20);
        let (conn1, mut rx1) = connection(ticket);
        let (conn2, mut rx2) = connection(ticket);

        registry.subscribe(ticket, conn1).await;
        registry.subscribe(ticket, conn2).await;

        let delivered = registry.broadcast(&ticket, OutboundFrame::Pong).await;

        assert_eq!(delivered, 2);
        assert_eq!(rx1.try_recv().unwrap(), OutboundFrame::Pong);
        assert_eq!(rx2.try_recv().unwrap(), OutboundFrame::Pong);
    }

    #[tokio::test]
    async fn test_broadcast_prunes_dead_connections() {
        let registry = ConnectionRegistry::new();
        let ticket = TicketId(21);

        let mut live = Vec::new();
        for _ in 0..3 {
            let (conn, rx) = connection(ticket);
            registry.subscribe(ticket, conn).await;
            live.push(rx);
        }
        for _ in 0..2 {
            let (conn, rx) = connection(ticket);
            registry.subscribe(ticket, conn).await;
            drop(rx);
        }
        assert_eq!(registry.topic_size(&ticket).await, 5);

        let delivered = registry.broadcast(&ticket, OutboundFrame::Done).await;

        assert_eq!(delivered, 3);
        assert_eq!(registry.topic_size(&ticket).await, 3);
        for rx in &mut live {
            assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Done);
        }
    }

    #[tokio::test]
    async fn test_closing_connection_counts_as_dead() {
        let registry = ConnectionRegistry::new();
        let ticket = TicketId(22);
        let (conn, _rx) = connection(ticket);
        registry.subscribe(ticket, Arc::clone(&conn)).await;

        conn.begin_closing();

        assert_eq!(registry.broadcast(&ticket, OutboundFrame::Pong).await, 0);
        assert_eq!(registry.topic_count().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_without_topic_is_noop() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.broadcast(&TicketId(404), OutboundFrame::Pong).await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_subscribers_are_all_retained() {
        let registry = Arc::new(ConnectionRegistry::new());
        let ticket = TicketId(30);

        let mut handles = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..16 {
            let (conn, rx) = connection(ticket);
            receivers.push(rx);
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.subscribe(ticket, conn).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.topic_size(&ticket).await, 16);
        assert_eq!(registry.broadcast(&ticket, OutboundFrame::Pong).await, 16);
    }
}
