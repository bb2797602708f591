//! End-to-end connection behaviour with a fake completion server
//!
//! Drives a [`Dispatcher`] directly through its inbound channel and reads
//! what the connection would have written to the socket.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use serde_json::{json, Value};
use ticketdesk_api::routes::create_router;
use ticketdesk_api::store::{AiMessageStore, InMemoryAiMessageStore};
use ticketdesk_api::websocket::events::{ClientFrame, OutboundFrame, ProtocolError};
use ticketdesk_api::websocket::{Connection, ConnectionMode, Dispatcher};
use ticketdesk_api::{AppState, Config};
use ticketdesk_shared::{ChatRole, TicketId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

type Inbound = mpsc::UnboundedSender<Result<ClientFrame, ProtocolError>>;

fn app_state(base_url: String, store: Arc<dyn AiMessageStore>) -> AppState {
    let config = Config {
        llm_base_url: base_url,
        llm_connect_retries: 0,
        llm_chunk_timeout_ms: 2_000,
        ..Config::default()
    };
    AppState::new(config, store).unwrap()
}

async fn connect(
    state: &AppState,
    mode: ConnectionMode,
    ticket_id: Option<TicketId>,
) -> (Inbound, mpsc::UnboundedReceiver<OutboundFrame>, tokio::task::JoinHandle<()>) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let conn = state
        .ws_state
        .add_connection(Connection::new(mode, ticket_id, out_tx))
        .await;
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(
        Dispatcher::new(state.clone(), conn, CancellationToken::new()).run(in_rx),
    );
    (in_tx, out_rx, handle)
}

async fn next_frame(rx: &mut mpsc::UnboundedReceiver<OutboundFrame>) -> OutboundFrame {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("connection channel closed")
}

/// Collect frames up to and including `[DONE]` (or an error)
async fn until_done(rx: &mut mpsc::UnboundedReceiver<OutboundFrame>) -> Vec<String> {
    let mut frames = Vec::new();
    loop {
        let frame = next_frame(rx).await;
        let finished = matches!(frame, OutboundFrame::Done | OutboundFrame::Error(_));
        frames.push(frame.to_text());
        if finished {
            return frames;
        }
    }
}

#[tokio::test]
async fn test_ticket_chat_streams_once_then_serves_cache() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/generate")
        .with_status(200)
        .with_body(concat!(
            "{\"response\":\"Hi\",\"done\":false}\n",
            "{\"response\":\" there\",\"done\":false}\n",
            "{\"response\":\"\",\"done\":true}\n",
        ))
        .expect(1)
        .create_async()
        .await;

    let store = Arc::new(InMemoryAiMessageStore::new());
    let state = app_state(server.url(), store.clone());
    let (in_tx, mut out_rx, handle) =
        connect(&state, ConnectionMode::TicketChat, Some(TicketId(9))).await;

    in_tx
        .send(Ok(ClientFrame::Prompt {
            prompt: "hello".to_string(),
            model: None,
        }))
        .unwrap();
    assert_eq!(until_done(&mut out_rx).await, vec!["Hi", " there", "[DONE]"]);

    let session = state.sessions.get(TicketId(9)).unwrap();
    assert_eq!(session.response.as_deref(), Some("Hi there"));

    in_tx
        .send(Ok(ClientFrame::Prompt {
            prompt: "hello again".to_string(),
            model: None,
        }))
        .unwrap();
    assert_eq!(until_done(&mut out_rx).await, vec!["Hi there", "[DONE]"]);

    drop(in_tx);
    handle.await.unwrap();
    mock.assert_async().await;

    // Persistence runs in the background after the stream.
    let mut persisted = Vec::new();
    for _ in 0..50 {
        persisted = store.get_ai_messages(TicketId(9)).await.unwrap();
        if persisted.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let roles: Vec<_> = persisted.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![ChatRole::User, ChatRole::Assistant]);
}

#[tokio::test]
async fn test_triage_gate_opens_on_third_turn() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/chat")
        .with_status(200)
        .with_body(concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Have you tried rebooting?\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
        ))
        .expect(3)
        .create_async()
        .await;

    let store = Arc::new(InMemoryAiMessageStore::new());
    let state = app_state(server.url(), store.clone());
    let (in_tx, mut out_rx, handle) = connect(&state, ConnectionMode::Triage, None).await;

    let frames = vec![
        ClientFrame::Initial {
            title: "Laptop".to_string(),
            description: "Will not boot".to_string(),
            urgency: Some("high".to_string()),
            model: None,
        },
        ClientFrame::Message {
            content: "Yes, twice".to_string(),
            model: None,
        },
        ClientFrame::Message {
            content: "Still black screen".to_string(),
            model: None,
        },
    ];

    for (i, frame) in frames.into_iter().enumerate() {
        in_tx.send(Ok(frame)).unwrap();
        assert_eq!(
            until_done(&mut out_rx).await,
            vec!["Have you tried rebooting?", "[DONE]"]
        );

        let turn = (i + 1) as u32;
        assert_eq!(
            next_frame(&mut out_rx).await,
            OutboundFrame::TriageStatus {
                turn_count: turn,
                gate_open: turn >= 3,
            }
        );
    }

    in_tx.send(Ok(ClientFrame::Save { ticket_id: TicketId(77) })).unwrap();
    assert_eq!(
        next_frame(&mut out_rx).await,
        OutboundFrame::Saved {
            ticket_id: TicketId(77),
            count: 6
        }
    );
    let saved = store.get_ai_messages(TicketId(77)).await.unwrap();
    assert_eq!(saved.len(), 6);
    assert_eq!(saved[0].role, ChatRole::User);
    assert!(saved[0].content.contains("Will not boot"));

    drop(in_tx);
    handle.await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_upstream_failure_sends_single_error_frame() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/generate")
        .with_status(500)
        .create_async()
        .await;

    let state = app_state(server.url(), Arc::new(InMemoryAiMessageStore::new()));
    let (in_tx, mut out_rx, handle) =
        connect(&state, ConnectionMode::TicketChat, Some(TicketId(3))).await;

    in_tx
        .send(Ok(ClientFrame::Prompt {
            prompt: "hello".to_string(),
            model: None,
        }))
        .unwrap();

    let frames = until_done(&mut out_rx).await;
    assert_eq!(frames.len(), 1);
    assert!(frames[0].starts_with("[ERROR] "));
    assert!(!state.sessions.get(TicketId(3)).unwrap().is_complete());

    drop(in_tx);
    handle.await.unwrap();
}

#[tokio::test]
async fn test_published_event_reaches_notification_socket() {
    let state = app_state("http://127.0.0.1:9".to_string(), Arc::new(InMemoryAiMessageStore::new()));
    let (in_tx, mut out_rx, handle) =
        connect(&state, ConnectionMode::Notifications, Some(TicketId(42))).await;

    // Wait until the dispatcher has subscribed.
    in_tx.send(Ok(ClientFrame::Ping)).unwrap();
    assert_eq!(next_frame(&mut out_rx).await, OutboundFrame::Pong);

    let app = create_router(state.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/tickets/42/events")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"type":"new_comment","data":{"id":7}}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value =
        serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(body, json!({"delivered": 1}));

    assert_eq!(
        next_frame(&mut out_rx).await.to_text(),
        r#"{"type":"new_comment","ticketId":42,"data":{"id":7}}"#
    );

    drop(in_tx);
    handle.await.unwrap();
}

#[tokio::test]
async fn test_http_validation_and_stats() {
    let state = app_state("http://127.0.0.1:9".to_string(), Arc::new(InMemoryAiMessageStore::new()));
    state.sessions.get_or_create(TicketId(5), "printer");

    let app = create_router(state.clone());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/tickets/5/events")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"type":"  ","data":{}}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value =
        serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/gateway/stats")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value =
        serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(body["sessions"]["total_sessions"], 1);
    assert_eq!(body["store"], "memory");

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/tickets/5/ai-session")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.sessions.get(TicketId(5)).is_none());
}
