//! Application state shared across handlers

use std::sync::Arc;

use crate::ai::{RelayError, SessionCache, StreamRelay};
use crate::config::Config;
use crate::notifications::NotificationFanout;
use crate::store::AiMessageStore;
use crate::websocket::WebSocketState;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ws_state: WebSocketState,
    pub fanout: NotificationFanout,
    pub sessions: Arc<SessionCache>,
    pub relay: StreamRelay,
    pub store: Arc<dyn AiMessageStore>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn AiMessageStore>) -> Result<Self, RelayError> {
        let relay = StreamRelay::new(&config)?;
        let ws_state = WebSocketState::new();
        let fanout = NotificationFanout::new(Arc::clone(&ws_state.registry));

        Ok(Self {
            config: Arc::new(config),
            ws_state,
            fanout,
            sessions: Arc::new(SessionCache::new()),
            relay,
            store,
        })
    }
}
