//! WebSocket handlers for Axum
//!
//! Upgrades the four gateway endpoints and wires each socket to a writer
//! task, a reader task and the connection's [`Dispatcher`].

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use ticketdesk_shared::TicketId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

use super::{
    connection::{Connection, ConnectionMode},
    dispatcher::Dispatcher,
    events::{parse_client_frame, ClientFrame, OutboundFrame},
};

/// `GET /ws/tickets/:ticket_id/notifications`
pub async fn notifications_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(ticket_id): Path<i64>,
) -> Response {
    upgrade(ws, state, ConnectionMode::Notifications, Some(TicketId(ticket_id)))
}

/// `GET /ws/tickets/:ticket_id/chat`
pub async fn ticket_chat_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(ticket_id): Path<i64>,
) -> Response {
    upgrade(ws, state, ConnectionMode::TicketChat, Some(TicketId(ticket_id)))
}

/// `GET /ws/chat`
pub async fn generic_chat_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    upgrade(ws, state, ConnectionMode::GenericChat, None)
}

/// `GET /ws/triage`
pub async fn triage_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    upgrade(ws, state, ConnectionMode::Triage, None)
}

fn upgrade(
    ws: WebSocketUpgrade,
    state: AppState,
    mode: ConnectionMode,
    ticket_id: Option<TicketId>,
) -> Response {
    tracing::info!(mode = %mode, ticket_id = ?ticket_id, "WebSocket connection upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state, mode, ticket_id))
}

/// Handle individual WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    mode: ConnectionMode,
    ticket_id: Option<TicketId>,
) {
    let (mut sender, mut receiver) = socket.split();

    // Outbound frames for this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();

    let conn = state
        .ws_state
        .add_connection(Connection::new(mode, ticket_id, tx))
        .await;
    let session_id = conn.session_id;
    let cancel = CancellationToken::new();

    // Spawn task to send frames to client
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.to_text())).await.is_err() {
                break; // Connection closed
            }
        }
    });

    // Reader: answers pings itself so they are not stuck behind a running relay.
    // Idle means no inbound frames and no relay streaming an answer.
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let reader_conn = Arc::clone(&conn);
    let reader_cancel = cancel.clone();
    let idle_timeout = state.config.ws_idle_timeout();
    let recv_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                _ = reader_cancel.cancelled() => break,
                next = tokio::time::timeout(idle_timeout, receiver.next()) => match next {
                    Ok(Some(Ok(msg))) => msg,
                    Ok(Some(Err(e))) => {
                        tracing::debug!(session_id = %session_id, error = ?e, "WebSocket receive error");
                        break;
                    }
                    Ok(None) => break,
                    Err(_) if reader_conn.is_relaying() => continue,
                    Err(_) => {
                        tracing::info!(session_id = %session_id, timeout = ?idle_timeout, "WebSocket idle timeout");
                        break;
                    }
                },
            };

            match msg {
                Message::Text(text) => match parse_client_frame(&text) {
                    Ok(ClientFrame::Ping) => {
                        let _ = reader_conn.send(OutboundFrame::Pong);
                    }
                    parsed => {
                        if inbound_tx.send(parsed).is_err() {
                            break;
                        }
                    }
                },
                Message::Binary(_) => {
                    let _ = reader_conn.send(OutboundFrame::Error(
                        "Binary frames are not supported".to_string(),
                    ));
                }
                Message::Close(_) => {
                    tracing::info!(session_id = %session_id, "WebSocket close frame received");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {
                    // Axum handles ping/pong automatically
                }
            }
        }

        reader_conn.begin_closing();
        reader_cancel.cancel();
    });

    Dispatcher::new(state, conn, cancel).run(inbound_rx).await;

    recv_task.abort();
    send_task.abort();
}
