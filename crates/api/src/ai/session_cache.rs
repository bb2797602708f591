//! Per-ticket prompt/response cache
//!
//! Holds the single prompt/response pair of a ticket's primary AI chat so a
//! ticket is sent to the completion backend at most once.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use ticketdesk_shared::TicketId;
use time::OffsetDateTime;

/// Cached chat session for one ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub ticket_id: TicketId,
    pub prompt: String,
    pub response: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Session {
    fn new(ticket_id: TicketId, prompt: &str) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            ticket_id,
            prompt: prompt.to_string(),
            response: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.response.is_some()
    }
}

/// Thread-safe in-memory session cache
#[derive(Default)]
pub struct SessionCache {
    sessions: RwLock<HashMap<TicketId, Session>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means another thread panicked mid-insert; the map
    // itself is still consistent, so keep serving it.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<TicketId, Session>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TicketId, Session>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the ticket's session, creating it with `prompt` if absent
    ///
    /// The first prompt for a ticket wins: an existing session is returned
    /// untouched even if `prompt` differs.
    pub fn get_or_create(&self, ticket_id: TicketId, prompt: &str) -> Session {
        if let Some(existing) = self.read().get(&ticket_id) {
            return existing.clone();
        }

        let mut sessions = self.write();
        let session = sessions.entry(ticket_id).or_insert_with(|| {
            tracing::debug!(ticket_id = %ticket_id, "Created AI chat session");
            Session::new(ticket_id, prompt)
        });
        session.clone()
    }

    /// Record the completed response for a ticket
    ///
    /// Concurrent completions resolve as last write wins.
    pub fn complete(&self, ticket_id: TicketId, response: &str) {
        let mut sessions = self.write();
        match sessions.get_mut(&ticket_id) {
            Some(session) => {
                if session.response.is_some() {
                    tracing::debug!(ticket_id = %ticket_id, "Overwriting completed session response");
                }
                session.response = Some(response.to_string());
                session.updated_at = OffsetDateTime::now_utc();
            }
            None => {
                tracing::warn!(ticket_id = %ticket_id, "Completion for unknown session ignored");
            }
        }
    }

    pub fn get(&self, ticket_id: TicketId) -> Option<Session> {
        self.read().get(&ticket_id).cloned()
    }

    /// Drop a ticket's session (ticket deleted or reset by a collaborator)
    pub fn invalidate(&self, ticket_id: TicketId) -> bool {
        self.write().remove(&ticket_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> SessionCacheStats {
        let sessions = self.read();
        let completed = sessions.values().filter(|s| s.is_complete()).count();
        SessionCacheStats {
            total_sessions: sessions.len(),
            completed_sessions: completed,
        }
    }
}

/// Session cache statistics
#[derive(Default, Debug, Clone, Serialize)]
pub struct SessionCacheStats {
    pub total_sessions: usize,
    pub completed_sessions: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_get_or_create_is_idempotent() {
        let cache = SessionCache::new();

        let first = cache.get_or_create(TicketId(1), "why is my invoice wrong?");
        let second = cache.get_or_create(TicketId(1), "why is my invoice wrong?");

        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_first_prompt_wins() {
        let cache = SessionCache::new();

        cache.get_or_create(TicketId(7), "first");
        let again = cache.get_or_create(TicketId(7), "second");

        assert_eq!(again.prompt, "first");
        assert!(again.response.is_none());
    }

    #[test]
    fn test_complete_fills_response() {
        let cache = SessionCache::new();
        let created = cache.get_or_create(TicketId(3), "hello");

        cache.complete(TicketId(3), "Hi there");

        let session = cache.get(TicketId(3)).unwrap();
        assert_eq!(session.response.as_deref(), Some("Hi there"));
        assert_eq!(session.prompt, "hello");
        assert_eq!(session.created_at, created.created_at);
        assert!(session.updated_at >= created.updated_at);

        // Later lookups keep returning the completed session
        assert!(cache.get_or_create(TicketId(3), "other").is_complete());
    }

    #[test]
    fn test_last_write_wins() {
        let cache = SessionCache::new();
        cache.get_or_create(TicketId(4), "q");

        cache.complete(TicketId(4), "answer one");
        cache.complete(TicketId(4), "answer two");

        assert_eq!(
            cache.get(TicketId(4)).unwrap().response.as_deref(),
            Some("answer two")
        );
    }

    #[test]
    fn test_complete_unknown_ticket_is_noop() {
        let cache = SessionCache::new();
        cache.complete(TicketId(99), "orphan");
        assert!(cache.get(TicketId(99)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_and_stats() {
        let cache = SessionCache::new();
        cache.get_or_create(TicketId(1), "a");
        cache.get_or_create(TicketId(2), "b");
        cache.complete(TicketId(2), "done");

        let stats = cache.stats();
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.completed_sessions, 1);

        assert!(cache.invalidate(TicketId(2)));
        assert!(!cache.invalidate(TicketId(2)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_get_or_create_keeps_one_session() {
        let cache = Arc::new(SessionCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.get_or_create(TicketId(5), &format!("prompt {i}")))
            })
            .collect();

        let prompts: Vec<String> = handles
            .into_iter()
            .map(|h| h.join().unwrap().prompt)
            .collect();

        assert_eq!(cache.len(), 1);
        assert!(prompts.iter().all(|p| p == &prompts[0]));
    }
}
