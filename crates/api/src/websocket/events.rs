//! WebSocket frame types and serialization
//!
//! Client frames are small JSON objects (or raw prompt text); gateway frames
//! are raw token text, a completion sentinel, or JSON envelopes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ticketdesk_shared::TicketId;

use crate::ai::StreamEvent;

/// Marks the end of a token stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Prefix of error frames
pub const ERROR_PREFIX: &str = "[ERROR] ";

// =============================================================================
// Client-to-Gateway Frames
// =============================================================================

/// Frames sent from client to gateway
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// Keep-alive; answered with `pong`
    Ping,

    /// Opening problem description of a triage conversation
    Initial {
        title: String,
        description: String,
        urgency: Option<String>,
        model: Option<String>,
    },

    /// Follow-up message in a conversation
    Message {
        content: String,
        model: Option<String>,
    },

    /// Persist the current conversation onto a ticket before closing
    Save { ticket_id: TicketId },

    /// Single prompt (`{"prompt": ...}` or raw text)
    Prompt {
        prompt: String,
        model: Option<String>,
    },
}

impl ClientFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::Ping => "ping",
            ClientFrame::Initial { .. } => "initial",
            ClientFrame::Message { .. } => "message",
            ClientFrame::Save { .. } => "save",
            ClientFrame::Prompt { .. } => "prompt",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TypedFrame {
    Ping,
    Initial {
        #[serde(default)]
        title: String,
        description: String,
        #[serde(default)]
        urgency: Option<Value>,
        #[serde(default)]
        model: Option<String>,
    },
    Message {
        #[serde(alias = "message", alias = "prompt")]
        content: String,
        #[serde(default)]
        model: Option<String>,
    },
    Save {
        #[serde(alias = "ticket_id", rename = "ticketId")]
        ticket_id: TicketId,
    },
}

#[derive(Debug, Deserialize)]
struct PromptFrame {
    prompt: String,
    #[serde(default)]
    model: Option<String>,
}

/// Client frame that cannot be accepted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid JSON frame: {0}")]
    InvalidJson(String),
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
    #[error("Empty frame")]
    Empty,
    #[error("'{frame}' frames are not supported on {mode} connections")]
    UnsupportedInMode { frame: &'static str, mode: &'static str },
}

pub fn is_ping(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("ping")
}

/// Classify a text frame from the client
///
/// Anything that does not look like a JSON object is taken as a raw prompt.
pub fn parse_client_frame(text: &str) -> Result<ClientFrame, ProtocolError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::Empty);
    }
    if is_ping(trimmed) {
        return Ok(ClientFrame::Ping);
    }
    if !trimmed.starts_with('{') {
        return Ok(ClientFrame::Prompt {
            prompt: trimmed.to_string(),
            model: None,
        });
    }

    let value: Value =
        serde_json::from_str(trimmed).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

    if value.get("type").is_some() {
        let typed: TypedFrame = serde_json::from_value(value)
            .map_err(|e| ProtocolError::InvalidFrame(e.to_string()))?;
        return Ok(match typed {
            TypedFrame::Ping => ClientFrame::Ping,
            TypedFrame::Initial {
                title,
                description,
                urgency,
                model,
            } => ClientFrame::Initial {
                title,
                description,
                urgency: urgency.and_then(|u| match u {
                    Value::String(s) => Some(s),
                    Value::Null => None,
                    other => Some(other.to_string()),
                }),
                model: non_empty(model),
            },
            TypedFrame::Message { content, model } => ClientFrame::Message {
                content,
                model: non_empty(model),
            },
            TypedFrame::Save { ticket_id } => ClientFrame::Save { ticket_id },
        });
    }

    if value.get("prompt").is_some() {
        let frame: PromptFrame = serde_json::from_value(value)
            .map_err(|e| ProtocolError::InvalidFrame(e.to_string()))?;
        return Ok(ClientFrame::Prompt {
            prompt: frame.prompt,
            model: non_empty(frame.model),
        });
    }

    Err(ProtocolError::InvalidFrame(
        "expected a 'type' or 'prompt' field".to_string(),
    ))
}

fn non_empty(model: Option<String>) -> Option<String> {
    model.filter(|m| !m.trim().is_empty())
}

// =============================================================================
// Gateway-to-Client Frames
// =============================================================================

/// Frames sent from gateway to client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Incremental token text
    Token(String),
    /// Previously computed answer replayed in one frame
    Cached(String),
    /// End of the token stream
    Done,
    /// Error message; the connection stays open
    Error(String),
    /// Heartbeat response
    Pong,
    /// Pre-serialized notification envelope, shared by all subscribers
    Notification(Arc<str>),
    /// Triage progress after each assistant turn
    TriageStatus { turn_count: u32, gate_open: bool },
    /// Conversation persisted onto a ticket
    Saved { ticket_id: TicketId, count: usize },
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StatusEnvelope {
    #[serde(rename_all = "camelCase")]
    TriageStatus { turn_count: u32, gate_open: bool },
    #[serde(rename_all = "camelCase")]
    Saved { ticket_id: TicketId, count: usize },
}

impl OutboundFrame {
    /// Encode the frame as WebSocket text
    pub fn to_text(&self) -> String {
        match self {
            OutboundFrame::Token(text) | OutboundFrame::Cached(text) => text.clone(),
            OutboundFrame::Done => DONE_SENTINEL.to_string(),
            OutboundFrame::Error(message) => format!("{ERROR_PREFIX}{message}"),
            OutboundFrame::Pong => "pong".to_string(),
            OutboundFrame::Notification(json) => json.to_string(),
            OutboundFrame::TriageStatus {
                turn_count,
                gate_open,
            } => serde_json::to_string(&StatusEnvelope::TriageStatus {
                turn_count: *turn_count,
                gate_open: *gate_open,
            })
            .unwrap_or_default(),
            OutboundFrame::Saved { ticket_id, count } => {
                serde_json::to_string(&StatusEnvelope::Saved {
                    ticket_id: *ticket_id,
                    count: *count,
                })
                .unwrap_or_default()
            }
        }
    }
}

impl From<StreamEvent> for OutboundFrame {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Token(text) => OutboundFrame::Token(text),
            StreamEvent::Done => OutboundFrame::Done,
            StreamEvent::Error(reason) => OutboundFrame::Error(reason),
        }
    }
}
