//! Per-connection frame dispatcher
//!
//! Owns everything a single connection does after the upgrade: topic
//! subscription for notification sockets, the ticket chat cache lookup, the
//! conversation state of triage/generic chat, and the one relay that may be
//! in flight. Frames are handled strictly in arrival order.

use std::sync::Arc;

use ticketdesk_shared::{ChatRole, TicketId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ai::prompts::{triage_problem_description, GENERIC_CHAT_SYSTEM_PROMPT, TRIAGE_SYSTEM_PROMPT};
use crate::ai::{
    CompletionRequest, ConversationError, ConversationSession, ConversationState, RelayError,
    StreamEvent,
};
use crate::state::AppState;
use crate::store::persist_turns;

use super::connection::{Connection, ConnectionMode};
use super::events::{ClientFrame, OutboundFrame, ProtocolError};

/// How a relay ended, seen from the connection
enum RelayOutcome {
    Completed(String),
    Failed(RelayError),
    /// The connection closed and the relay did not finish within the grace period
    Cancelled,
}

pub struct Dispatcher {
    state: AppState,
    conn: Arc<Connection>,
    cancel: CancellationToken,
    conversation: ConversationSession,
}

impl Dispatcher {
    pub fn new(state: AppState, conn: Arc<Connection>, cancel: CancellationToken) -> Self {
        let conversation = ConversationSession::new(state.config.triage_gate_turns);
        Self {
            state,
            conn,
            cancel,
            conversation,
        }
    }

    /// Process inbound frames until the reader goes away or the connection is cancelled
    pub async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<Result<ClientFrame, ProtocolError>>) {
        self.on_open().await;
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = inbound.recv() => match frame {
                    Some(Ok(frame)) => self.handle_frame(frame).await,
                    Some(Err(e)) => {
                        tracing::debug!(session_id = %self.conn.session_id, error = %e, "Rejected client frame");
                        self.send(OutboundFrame::Error(e.to_string()));
                    }
                    None => break,
                },
            }
        }

        self.on_close().await;
    }

    async fn on_open(&self) {
        if self.conn.mode == ConnectionMode::Notifications {
            if let Some(ticket_id) = self.conn.ticket_id {
                self.state
                    .ws_state
                    .registry
                    .subscribe(ticket_id, Arc::clone(&self.conn))
                    .await;
            }
        }
    }

    async fn on_close(&mut self) {
        self.conn.begin_closing();
        self.cancel.cancel();
        self.state.ws_state.remove_connection(&self.conn.session_id).await;
        self.conversation.close();
        self.conn.mark_closed();

        tracing::info!(
            session_id = %self.conn.session_id,
            mode = %self.conn.mode,
            "Connection closed"
        );
    }

    fn send(&self, frame: OutboundFrame) {
        // A failed send means the socket is going away; the reader notices.
        let _ = self.conn.send(frame);
    }

    fn reject(&self, frame: &ClientFrame) {
        self.send(OutboundFrame::Error(
            ProtocolError::UnsupportedInMode {
                frame: frame.kind(),
                mode: self.conn.mode.as_str(),
            }
            .to_string(),
        ));
    }

    fn model_or_default(&self, model: Option<String>) -> String {
        model.unwrap_or_else(|| self.state.config.llm_default_model.clone())
    }

    async fn handle_frame(&mut self, frame: ClientFrame) {
        tracing::debug!(
            session_id = %self.conn.session_id,
            mode = %self.conn.mode,
            frame = frame.kind(),
            "Client frame received"
        );

        if frame == ClientFrame::Ping {
            self.send(OutboundFrame::Pong);
            return;
        }

        match self.conn.mode {
            ConnectionMode::Notifications => self.reject(&frame),
            ConnectionMode::TicketChat => match frame {
                ClientFrame::Prompt { prompt, model } => self.handle_ticket_prompt(prompt, model).await,
                ClientFrame::Message { content, model } => self.handle_ticket_prompt(content, model).await,
                other => self.reject(&other),
            },
            ConnectionMode::GenericChat => match frame {
                ClientFrame::Prompt { prompt, model } => self.handle_generic_message(prompt, model).await,
                ClientFrame::Message { content, model } => self.handle_generic_message(content, model).await,
                ClientFrame::Save { ticket_id } => self.handle_save(ticket_id).await,
                other => self.reject(&other),
            },
            ConnectionMode::Triage => match frame {
                ClientFrame::Initial {
                    title,
                    description,
                    urgency,
                    model,
                } => {
                    if description.trim().is_empty() {
                        self.send(OutboundFrame::Error(ConversationError::EmptyMessage.to_string()));
                        return;
                    }
                    let problem = triage_problem_description(&title, &description, urgency.as_deref());
                    let result = self
                        .conversation
                        .begin(TRIAGE_SYSTEM_PROMPT, &problem)
                        .map(|h| h.to_vec());
                    self.run_conversation_turn(result, model).await;
                }
                ClientFrame::Message { content, model } | ClientFrame::Prompt { prompt: content, model } => {
                    let result = self.conversation.follow_up(&content).map(|h| h.to_vec());
                    self.run_conversation_turn(result, model).await;
                }
                ClientFrame::Save { ticket_id } => self.handle_save(ticket_id).await,
                other => self.reject(&other),
            },
        }
    }

    /// Ticket chat: answer from the session cache, relaying upstream only once per ticket
    async fn handle_ticket_prompt(&mut self, prompt: String, model: Option<String>) {
        let Some(ticket_id) = self.conn.ticket_id else {
            self.send(OutboundFrame::Error("Ticket chat requires a ticket".to_string()));
            return;
        };
        if prompt.trim().is_empty() {
            self.send(OutboundFrame::Error(ProtocolError::Empty.to_string()));
            return;
        }

        let session = self.state.sessions.get_or_create(ticket_id, &prompt);
        if let Some(response) = session.response {
            tracing::debug!(ticket_id = %ticket_id, "Serving cached AI response");
            self.send(OutboundFrame::Cached(response));
            self.send(OutboundFrame::Done);
            return;
        }

        // The stored prompt is what gets answered, even if this frame differs.
        let request = CompletionRequest::Generate {
            model: self.model_or_default(model),
            prompt: session.prompt.clone(),
        };

        if let RelayOutcome::Completed(text) = self.run_relay(request).await {
            self.state.sessions.complete(ticket_id, &text);
            self.persist_in_background(
                ticket_id,
                vec![(ChatRole::User, session.prompt), (ChatRole::Assistant, text)],
            );
        }
    }

    async fn handle_generic_message(&mut self, content: String, model: Option<String>) {
        let result = if self.conversation.state() == ConversationState::Idle {
            self.conversation
                .begin(GENERIC_CHAT_SYSTEM_PROMPT, &content)
                .map(|h| h.to_vec())
        } else {
            self.conversation.follow_up(&content).map(|h| h.to_vec())
        };
        self.run_conversation_turn(result, model).await;
    }

    async fn run_conversation_turn(
        &mut self,
        history: Result<Vec<ticketdesk_shared::ChatMessage>, ConversationError>,
        model: Option<String>,
    ) {
        let messages = match history {
            Ok(messages) => messages,
            Err(e) => {
                self.send(OutboundFrame::Error(e.to_string()));
                return;
            }
        };

        let request = CompletionRequest::Chat {
            model: self.model_or_default(model),
            messages,
        };

        match self.run_relay(request).await {
            RelayOutcome::Completed(reply) => {
                let turn_count = match self.conversation.complete_turn(&reply) {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::warn!(session_id = %self.conn.session_id, error = %e, "Dropped assistant turn");
                        return;
                    }
                };

                if self.conn.mode == ConnectionMode::Triage {
                    let gate_open = self.conversation.is_gate_open();
                    if turn_count == self.conversation.gate_threshold() {
                        tracing::info!(
                            session_id = %self.conn.session_id,
                            turn_count,
                            "Triage gate opened"
                        );
                    }
                    self.send(OutboundFrame::TriageStatus { turn_count, gate_open });
                }
            }
            RelayOutcome::Failed(e) => {
                tracing::debug!(session_id = %self.conn.session_id, error = %e, "Rolling back failed turn");
                self.conversation.abort_turn();
            }
            RelayOutcome::Cancelled => {}
        }
    }

    /// Persist the conversation (minus the system prompt) onto a ticket
    async fn handle_save(&mut self, ticket_id: TicketId) {
        if self.conversation.turn_count() == 0 {
            self.send(OutboundFrame::Error(ConversationError::NotStarted.to_string()));
            return;
        }

        let turns: Vec<(ChatRole, String)> = self
            .conversation
            .history()
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| (m.role, m.content.clone()))
            .collect();

        match persist_turns(self.state.store.as_ref(), ticket_id, turns).await {
            Ok(count) => {
                tracing::info!(
                    session_id = %self.conn.session_id,
                    ticket_id = %ticket_id,
                    count,
                    "Saved conversation to ticket"
                );
                self.send(OutboundFrame::Saved { ticket_id, count });
            }
            Err(e) => {
                tracing::error!(ticket_id = %ticket_id, error = %e, "Failed to save conversation");
                self.send(OutboundFrame::Error("Failed to save conversation".to_string()));
            }
        }
    }

    fn persist_in_background(&self, ticket_id: TicketId, turns: Vec<(ChatRole, String)>) {
        let store = Arc::clone(&self.state.store);
        tokio::spawn(async move {
            if let Err(e) = persist_turns(store.as_ref(), ticket_id, turns).await {
                tracing::warn!(
                    ticket_id = %ticket_id,
                    backend = store.backend(),
                    error = %e,
                    "Failed to persist AI messages"
                );
            }
        });
    }

    /// Drive one relay, forwarding its events to the client as they arrive
    ///
    /// If the connection is cancelled meanwhile the relay gets a short grace
    /// period to finish; a relay that finishes in time still counts as
    /// completed so its answer can be cached.
    async fn run_relay(&self, request: CompletionRequest) -> RelayOutcome {
        let _in_flight = self.conn.relay_in_flight();
        let (sink, mut events) = mpsc::unbounded_channel::<StreamEvent>();
        let relay = self.state.relay.clone();
        let conn = Arc::clone(&self.conn);

        let produce = async move {
            let result = relay.relay(&request, &sink).await;
            drop(sink);
            result
        };
        let forward = async move {
            while let Some(event) = events.recv().await {
                let _ = conn.send(OutboundFrame::from(event));
            }
        };
        let work = async move {
            let (result, ()) = tokio::join!(produce, forward);
            result
        };
        tokio::pin!(work);

        let result = tokio::select! {
            result = &mut work => result,
            _ = self.cancel.cancelled() => {
                let grace = self.state.config.relay_cancel_grace();
                match tokio::time::timeout(grace, &mut work).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::debug!(
                            session_id = %self.conn.session_id,
                            grace = ?grace,
                            "Relay cancelled after connection closed"
                        );
                        return RelayOutcome::Cancelled;
                    }
                }
            }
        };

        match result {
            Ok(text) => RelayOutcome::Completed(text),
            Err(e) => RelayOutcome::Failed(e),
        }
    }
}
