//! Ticket change notifications
//!
//! Collaborators (comment service, ticket updates) call into the fanout when
//! something happens to a ticket; every connection subscribed to that
//! ticket's topic receives one JSON frame.

pub mod fanout;

pub use fanout::{NotificationEvent, NotificationFanout, NEW_COMMENT, TICKET_UPDATE};
