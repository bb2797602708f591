//! Completion backend types
//!
//! Request bodies and streamed records for an Ollama-compatible completion
//! server, plus the normalized [`StreamEvent`] the relay emits.

use serde::{Deserialize, Serialize};
use ticketdesk_shared::ChatMessage;

/// Normalized unit emitted by the relay to its owning connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A filtered, non-empty text fragment
    Token(String),
    /// The upstream flagged the answer as complete
    Done,
    /// The relay failed; carries a user-presentable reason
    Error(String),
}

/// A completion call the relay can drive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionRequest {
    /// Single-shot prompt (`/api/generate`)
    Generate { model: String, prompt: String },
    /// Multi-turn conversation replayed verbatim (`/api/chat`)
    Chat {
        model: String,
        messages: Vec<ChatMessage>,
    },
}

impl CompletionRequest {
    /// Path on the completion server for this request kind
    pub fn path(&self) -> &'static str {
        match self {
            CompletionRequest::Generate { .. } => "/api/generate",
            CompletionRequest::Chat { .. } => "/api/chat",
        }
    }

    pub fn model(&self) -> &str {
        match self {
            CompletionRequest::Generate { model, .. } | CompletionRequest::Chat { model, .. } => {
                model
            }
        }
    }

    /// JSON body sent upstream; streaming is always requested
    pub fn to_body(&self) -> serde_json::Value {
        match self {
            CompletionRequest::Generate { model, prompt } => serde_json::json!({
                "model": model,
                "prompt": prompt,
                "stream": true,
            }),
            CompletionRequest::Chat { model, messages } => serde_json::json!({
                "model": model,
                "messages": messages,
                "stream": true,
            }),
        }
    }
}

/// One newline-delimited record of a streamed completion
///
/// `/api/generate` puts text in `response`, `/api/chat` in `message.content`.
#[derive(Debug, Default, Deserialize)]
pub struct CompletionChunk {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub message: Option<ChunkMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkMessage {
    #[serde(default)]
    pub content: String,
}

impl CompletionChunk {
    /// Text fragment carried by this record, if any
    pub fn text(&self) -> Option<&str> {
        self.response
            .as_deref()
            .or_else(|| self.message.as_ref().map(|m| m.content.as_str()))
            .filter(|t| !t.is_empty())
    }
}

/// Model entry from the backend's tag listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ModelList {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}
