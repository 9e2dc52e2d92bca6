//! Yandex Alice skill webhook.
//!
//! ```text
//! Alice -> Relay: {"request":{"command":"открой браузер",...},"session":{"new":false,"session_id":"S1","message_id":1},"version":"1.0"}
//! Relay -> Alice: {"response":{"text":"...","end_session":false},"version":"1.0"}
//! ```
//!
//! The Alice protocol has no error channel, so every failure is reported to
//! the user as plain text with a 200 status.

use super::AppState;
use crate::relay::{Relay, RelayError};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};

/// Envelope version used when the request does not declare one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "1.0";

pub const GREETING_TEXT: &str =
    "Привет! Я могу управлять твоим компьютером. Скажи, что нужно сделать.";
pub const AGENT_UNAVAILABLE_TEXT: &str = "Компьютер сейчас недоступен.";
pub const DELIVERY_FAILED_TEXT: &str = "Не удалось отправить команду на компьютер.";
pub const NO_RESPONSE_TEXT: &str = "Команда принята, но компьютер не ответил вовремя.";

/// Utterance Yandex sends to probe skill health.
const PING_UTTERANCE: &str = "ping";
const PONG_TEXT: &str = "pong";

#[derive(Debug, Default, Clone, Deserialize)]
pub struct AliceRequest {
    #[serde(default)]
    pub request: AliceCommand,
    #[serde(default)]
    pub session: AliceSession,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct AliceCommand {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub original_utterance: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct AliceSession {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub message_id: i64,
    #[serde(default)]
    pub skill_id: String,
}

impl AliceRequest {
    /// Echo the caller's protocol version, defaulting to `1.0`.
    pub fn version_or_default(&self) -> &str {
        if self.version.is_empty() {
            DEFAULT_PROTOCOL_VERSION
        } else {
            &self.version
        }
    }

    /// Correlation id for the agent round trip: session plus sequence number.
    pub fn correlation_id(&self) -> String {
        format!("{}-{}", self.session.session_id, self.session.message_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliceResponse {
    pub response: AliceReply,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliceReply {
    pub text: String,
    pub end_session: bool,
}

impl AliceResponse {
    pub fn text(text: impl Into<String>, version: &str) -> Self {
        Self {
            response: AliceReply {
                text: text.into(),
                end_session: false,
            },
            version: version.to_string(),
        }
    }
}

/// POST /alice/webhook
pub async fn handle_alice_webhook(
    State(state): State<AppState>,
    body: Result<Json<AliceRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!("Alice webhook JSON parse error: {e}");
            return (StatusCode::BAD_REQUEST, "Bad request").into_response();
        }
    };

    Json(respond(&state.relay, &request).await).into_response()
}

/// Turn one Alice request into its reply, forwarding to the agent if needed.
pub async fn respond(relay: &Relay, request: &AliceRequest) -> AliceResponse {
    let version = request.version_or_default();

    if request.request.original_utterance == PING_UTTERANCE {
        return AliceResponse::text(PONG_TEXT, version);
    }

    let command = request.request.command.as_str();
    if request.session.new && command.is_empty() {
        return AliceResponse::text(GREETING_TEXT, version);
    }

    let id = request.correlation_id();
    let text = match relay.forward(&id, command).await {
        Ok(reply) => reply,
        Err(RelayError::NoAgentConnected) => {
            tracing::debug!(id, "No agent linked; answering unavailable");
            AGENT_UNAVAILABLE_TEXT.to_string()
        }
        Err(e @ (RelayError::DeliveryFailed(_) | RelayError::Encode(_))) => {
            tracing::warn!(id, "Failed to send to agent: {e}");
            DELIVERY_FAILED_TEXT.to_string()
        }
        Err(e @ RelayError::ReplyTimeout(_)) => {
            tracing::info!(id, "No agent reply: {e}");
            NO_RESPONSE_TEXT.to_string()
        }
    };

    AliceResponse::text(text, version)
}
