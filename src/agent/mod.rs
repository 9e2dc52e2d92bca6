//! Agent side of the relay channel.
//!
//! Connects to the relay's `/ws` endpoint, runs every command frame through a
//! [`CommandHandler`], and answers with a frame carrying the same id.
//! Commands on one connection are handled in arrival order.

use crate::config::AgentClientConfig;
use crate::relay::AgentFrame;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

/// Executes one command received from the relay.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, command: &str) -> Result<String>;
}

/// Replies with the command text unchanged. Useful for checking a relay
/// deployment end to end.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[async_trait]
impl CommandHandler for EchoHandler {
    fn name(&self) -> &str {
        "echo"
    }

    async fn handle(&self, command: &str) -> Result<String> {
        Ok(command.to_string())
    }
}

/// Relay URL with the shared secret appended as `?key=`.
pub fn connect_url(config: &AgentClientConfig) -> String {
    let url = config.server_url.trim();
    let key = config.api_key.trim();
    if key.is_empty() {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}key={}", urlencoding::encode(key))
}

/// Stay connected to the relay forever, reconnecting after a fixed delay.
pub async fn run(config: AgentClientConfig, handler: Arc<dyn CommandHandler>) -> Result<()> {
    let delay = Duration::from_secs(config.reconnect_delay_secs.max(1));
    let url = connect_url(&config);

    tracing::info!(handler = handler.name(), "Starting relay agent");
    loop {
        tracing::info!("Connecting to {}", config.server_url);
        match serve_connection(&url, handler.as_ref()).await {
            Ok(()) => tracing::warn!(
                "Relay closed the connection. Reconnecting in {}s...",
                delay.as_secs()
            ),
            Err(e) => tracing::warn!(
                "Connection lost: {e:#}. Reconnecting in {}s...",
                delay.as_secs()
            ),
        }
        tokio::time::sleep(delay).await;
    }
}

/// Serve a single relay connection until it closes.
pub async fn serve_connection(url: &str, handler: &dyn CommandHandler) -> Result<()> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .context("Failed to connect to relay")?;
    tracing::info!("Connected to relay server");

    let (mut write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        let reply = match msg.context("Relay WebSocket read failed")? {
            Message::Text(text) => handle_frame(handler, text.as_str().as_bytes()).await,
            Message::Binary(bytes) => handle_frame(handler, &bytes).await,
            Message::Close(_) => break,
            _ => continue,
        };
        let Some(reply) = reply else { continue };

        let encoded = serde_json::to_string(&reply)?;
        write
            .send(Message::Text(encoded.into()))
            .await
            .context("Failed to send reply to relay")?;
    }

    Ok(())
}

/// Run one command frame through `handler`. Returns `None` for frames that
/// cannot be parsed; handler failures become an error text reply.
pub async fn handle_frame(handler: &dyn CommandHandler, payload: &[u8]) -> Option<AgentFrame> {
    let frame: AgentFrame = match serde_json::from_slice(payload) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!("Invalid command frame from relay: {e}");
            return None;
        }
    };

    tracing::info!(id = %frame.id, "Received command: {}", frame.text);
    let text = match handler.handle(&frame.text).await {
        Ok(result) => {
            tracing::info!(id = %frame.id, "Result: {result}");
            result
        }
        Err(e) => {
            tracing::error!(id = %frame.id, "Error processing command: {e:#}");
            format!("Ошибка: {e}")
        }
    };

    Some(AgentFrame::new(frame.id, text))
}
