//! Multi-turn conversation state for triage and generic chat connections
//!
//! The history is replayed verbatim to the completion backend on every turn,
//! so appends are strictly chronological and a failed turn is rolled back
//! rather than left dangling.

use ticketdesk_shared::{ChatMessage, ChatRole};

/// Assistant turns after which the triage gate opens
pub const DEFAULT_GATE_TURNS: u32 = 3;

/// Protocol state of one conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// Waiting for the initial problem description
    Idle,
    /// Initial description sent, first assistant turn in flight
    AwaitingFirstReply,
    /// Ready for a follow-up message
    Conversing,
    /// Follow-up sent, assistant turn in flight
    AwaitingReply,
    /// Connection closed, history discarded
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversationError {
    #[error("Conversation already started")]
    AlreadyStarted,
    #[error("Send an initial problem description first")]
    NotStarted,
    #[error("Still waiting for the assistant to answer")]
    ReplyPending,
    #[error("No assistant turn is in flight")]
    NoTurnInFlight,
    #[error("Message content must not be empty")]
    EmptyMessage,
    #[error("Conversation is closed")]
    Closed,
}

/// Per-connection conversation history and turn counter
#[derive(Debug)]
pub struct ConversationSession {
    history: Vec<ChatMessage>,
    state: ConversationState,
    turn_count: u32,
    gate_threshold: u32,
}

impl ConversationSession {
    pub fn new(gate_threshold: u32) -> Self {
        Self {
            history: Vec::new(),
            state: ConversationState::Idle,
            turn_count: 0,
            gate_threshold: gate_threshold.max(1),
        }
    }

    /// Start the conversation with a system prompt and the user's problem
    ///
    /// Returns the history to replay upstream.
    pub fn begin(
        &mut self,
        system_prompt: &str,
        description: &str,
    ) -> Result<&[ChatMessage], ConversationError> {
        match self.state {
            ConversationState::Idle => {}
            ConversationState::Closed => return Err(ConversationError::Closed),
            _ => return Err(ConversationError::AlreadyStarted),
        }
        if description.trim().is_empty() {
            return Err(ConversationError::EmptyMessage);
        }

        self.history.push(ChatMessage::system(system_prompt));
        self.history.push(ChatMessage::user(description));
        self.state = ConversationState::AwaitingFirstReply;
        Ok(&self.history)
    }

    /// Append a user follow-up; only valid between assistant turns
    pub fn follow_up(&mut self, content: &str) -> Result<&[ChatMessage], ConversationError> {
        match self.state {
            ConversationState::Conversing => {}
            ConversationState::Idle => return Err(ConversationError::NotStarted),
            ConversationState::AwaitingFirstReply | ConversationState::AwaitingReply => {
                return Err(ConversationError::ReplyPending)
            }
            ConversationState::Closed => return Err(ConversationError::Closed),
        }
        if content.trim().is_empty() {
            return Err(ConversationError::EmptyMessage);
        }

        self.history.push(ChatMessage::user(content));
        self.state = ConversationState::AwaitingReply;
        Ok(&self.history)
    }

    /// Record the completed assistant turn; returns the new turn count
    pub fn complete_turn(&mut self, reply: &str) -> Result<u32, ConversationError> {
        match self.state {
            ConversationState::AwaitingFirstReply | ConversationState::AwaitingReply => {}
            ConversationState::Closed => return Err(ConversationError::Closed),
            _ => return Err(ConversationError::NoTurnInFlight),
        }

        self.history.push(ChatMessage::assistant(reply));
        self.turn_count += 1;
        self.state = ConversationState::Conversing;
        Ok(self.turn_count)
    }

    /// Roll back the pending user message after a failed relay
    ///
    /// A failed first turn returns to `Idle` with an empty history so the
    /// client can resend its initial description.
    pub fn abort_turn(&mut self) {
        match self.state {
            ConversationState::AwaitingFirstReply => {
                self.history.clear();
                self.state = ConversationState::Idle;
            }
            ConversationState::AwaitingReply => {
                if matches!(self.history.last(), Some(m) if m.role == ChatRole::User) {
                    self.history.pop();
                }
                self.state = ConversationState::Conversing;
            }
            _ => {}
        }
    }

    /// Discard the history; the session accepts nothing afterwards
    pub fn close(&mut self) {
        self.history.clear();
        self.state = ConversationState::Closed;
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    pub fn gate_threshold(&self) -> u32 {
        self.gate_threshold
    }

    /// True once enough assistant turns happened to offer resolve/escalate
    pub fn is_gate_open(&self) -> bool {
        self.turn_count >= self.gate_threshold
    }
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new(DEFAULT_GATE_TURNS)
    }
}
