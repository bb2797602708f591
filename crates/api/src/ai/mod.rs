//! AI assistant plumbing
//!
//! Everything between a client connection and the external completion
//! server: the streaming relay, the per-ticket response cache, and the
//! multi-turn conversation state used by triage and generic chat.
//!
//! ```text
//! Dispatcher --CompletionRequest--> StreamRelay --POST (NDJSON)--> completion server
//!            <----StreamEvent------
//! ```

pub mod conversation;
pub mod ndjson;
pub mod prompts;
pub mod relay;
pub mod session_cache;
pub mod types;

pub use conversation::{ConversationError, ConversationSession, ConversationState};
pub use relay::{RelayError, RelayResult, StreamRelay};
pub use session_cache::{Session, SessionCache};
pub use types::{CompletionRequest, StreamEvent};
