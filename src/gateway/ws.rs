//! WebSocket endpoint the PC agent connects to.
//!
//! Protocol:
//! ```text
//! Relay -> Agent: {"id":"S1-1","text":"открой браузер"}
//! Agent -> Relay: {"id":"S1-1","text":"Готово"}
//! ```
//!
//! Only one agent is linked at a time; a new connection supersedes the old
//! one. Unparseable frames are logged and skipped without dropping the link.

use super::AppState;
use crate::relay::{AgentConnection, AgentFrame, Relay};
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct WsQuery {
    pub key: Option<String>,
}

/// GET /ws: WebSocket upgrade for the PC agent
pub async fn handle_agent_ws(
    State(state): State<AppState>,
    Query(params): Query<WsQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> impl IntoResponse {
    // Key check comes before the upgrade handshake is even validated
    if !state.agent_key.is_authorized(params.key.as_deref()) {
        tracing::warn!("Agent WebSocket: rejected, invalid or missing ?key=");
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.on_failed_upgrade(|e| tracing::warn!("Agent WebSocket upgrade failed: {e}"))
        .on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

/// Write half of an agent WebSocket, installed into the agent link.
struct WsAgentConnection {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl AgentConnection for WsAgentConnection {
    async fn send_text(&mut self, text: String) -> anyhow::Result<()> {
        self.sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let relay = state.relay.clone();

    let id = relay
        .link()
        .install(Box::new(WsAgentConnection { sink: sender }))
        .await;
    tracing::info!(connection = %id, "PC agent connected");

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => dispatch_frame(&relay, text.as_str().as_bytes()),
            Ok(Message::Binary(bytes)) => dispatch_frame(&relay, &bytes),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::info!(connection = %id, "Agent WebSocket read error: {e}");
                break;
            }
        }
    }

    if relay.link().clear(id).await {
        tracing::info!(connection = %id, "PC agent disconnected");
    } else {
        tracing::debug!(connection = %id, "Superseded agent connection closed");
    }
}

/// Parse one inbound frame and hand it to the registry. Never fails the
/// connection: malformed frames are logged, unmatched replies dropped.
fn dispatch_frame(relay: &Relay, payload: &[u8]) {
    match serde_json::from_slice::<AgentFrame>(payload) {
        Ok(frame) => {
            relay.dispatch_reply(frame);
        }
        Err(e) => {
            tracing::warn!("Invalid frame from agent: {e}");
        }
    }
}
