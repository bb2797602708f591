//! Ticketdesk gateway library
//!
//! Real-time layer of the ticket system: ticket change notifications over
//! WebSockets and streamed AI assistance (ticket chat, generic chat, triage)
//! relayed from an external completion server.

pub mod ai;
pub mod config;
pub mod error;
pub mod notifications;
pub mod routes;
pub mod state;
pub mod store;
pub mod websocket;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use notifications::NotificationFanout;
pub use state::AppState;
