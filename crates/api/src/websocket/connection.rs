//! WebSocket connection management
//!
//! Represents an accepted gateway connection: its mode, optional ticket, and
//! the non-blocking channel feeding its writer task.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use ticketdesk_shared::TicketId;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::OutboundFrame;

/// What the client connected for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Subscribed to change notifications of one ticket
    Notifications,
    /// Cached single-shot AI chat about one ticket
    TicketChat,
    /// Free-form multi-turn AI chat
    GenericChat,
    /// Pre-ticket triage conversation
    Triage,
}

impl ConnectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionMode::Notifications => "notifications",
            ConnectionMode::TicketChat => "ticket_chat",
            ConnectionMode::GenericChat => "generic_chat",
            ConnectionMode::Triage => "triage",
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Open,
            1 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Send attempted on a connection that is closing, closed, or whose writer is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection closed")]
pub struct ConnectionClosed;

/// Represents an active WebSocket connection
#[derive(Debug)]
pub struct Connection {
    /// Unique session ID for this connection
    pub session_id: Uuid,

    pub mode: ConnectionMode,

    /// Ticket this connection is bound to (absent for generic chat and triage)
    pub ticket_id: Option<TicketId>,

    /// Channel to send frames to this connection's writer task
    sender: mpsc::UnboundedSender<OutboundFrame>,

    state: AtomicU8,

    /// Set while a relay streams to this connection
    relaying: AtomicBool,
}

impl Connection {
    /// Create a new connection
    pub fn new(
        mode: ConnectionMode,
        ticket_id: Option<TicketId>,
        sender: mpsc::UnboundedSender<OutboundFrame>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            mode,
            ticket_id,
            sender,
            state: AtomicU8::new(ConnectionState::Open as u8),
            relaying: AtomicBool::new(false),
        }
    }

    /// Send a frame to this connection without blocking
    pub fn send(&self, frame: OutboundFrame) -> Result<(), ConnectionClosed> {
        if self.state() != ConnectionState::Open {
            return Err(ConnectionClosed);
        }
        self.sender.send(frame).map_err(|_| ConnectionClosed)
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Stop accepting new frames; cleanup is in progress
    pub fn begin_closing(&self) {
        let _ = self.state.compare_exchange(
            ConnectionState::Open as u8,
            ConnectionState::Closing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    /// Mark a relay as in flight until the returned guard is dropped
    ///
    /// The reader does not apply its idle timeout while this is held, since
    /// a client waiting on a long answer sends nothing.
    pub fn relay_in_flight(&self) -> RelayInFlight<'_> {
        self.relaying.store(true, Ordering::Release);
        RelayInFlight { conn: self }
    }

    pub fn is_relaying(&self) -> bool {
        self.relaying.load(Ordering::Acquire)
    }
}

/// Guard returned by [`Connection::relay_in_flight`]
pub struct RelayInFlight<'a> {
    conn: &'a Connection,
}

impl Drop for RelayInFlight<'_> {
    fn drop(&mut self) {
        self.conn.relaying.store(false, Ordering::Release);
    }
}
