//! WebSocket gateway
//!
//! Every client connection is one of four modes:
//! - ticket notifications (pub/sub on a ticket topic)
//! - ticket AI chat (cached per ticket)
//! - generic AI chat (multi-turn)
//! - triage (multi-turn with a turn-count gate)
//!
//! # Architecture
//!
//! - **Connection**: An accepted socket's mode, ticket and outbound channel
//! - **Registry**: Ticket-based pub/sub for broadcasting events
//! - **State**: Global WebSocket state shared across all connections
//! - **Dispatcher**: Per-connection frame handling and relay driving
//! - **Handler**: Axum WebSocket route handlers
//! - **Events**: Client/gateway frame definitions

pub mod connection;
pub mod dispatcher;
pub mod events;
pub mod handler;
pub mod registry;
pub mod state;

pub use connection::{Connection, ConnectionMode};
pub use dispatcher::Dispatcher;
pub use handler::{generic_chat_ws, notifications_ws, ticket_chat_ws, triage_ws};
pub use registry::ConnectionRegistry;
pub use state::WebSocketState;
