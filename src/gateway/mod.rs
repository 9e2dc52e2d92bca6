//! Axum-based HTTP gateway for the relay.
//!
//! Routes:
//! - `POST /alice/webhook`: Alice skill webhook, forwarded to the agent
//! - `GET  /ws`: WebSocket the PC agent links through
//! - `GET  /health`: liveness plus agent link status
//!
//! Every route gets a 64KB body limit and a 30s request timeout. The reply
//! wait inside the webhook is bounded separately and much shorter.

pub mod alice;
pub mod tls;
pub mod ws;

use crate::config::Config;
use crate::relay::Relay;
use crate::security::{is_public_bind, AgentKeyGuard};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB)
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (30s)
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub agent_key: Arc<AgentKeyGuard>,
}

impl AppState {
    pub fn new(relay: Arc<Relay>, agent_key: AgentKeyGuard) -> Self {
        Self {
            relay,
            agent_key: Arc::new(agent_key),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let relay = Relay::new(Duration::from_secs(config.gateway.reply_timeout_secs));
        Self::new(
            Arc::new(relay),
            AgentKeyGuard::new(config.gateway.shared_secret()),
        )
    }
}

/// Build the router with middleware.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/alice/webhook", post(alice::handle_alice_webhook))
        .route("/ws", get(ws::handle_agent_ws))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}

/// Run the relay gateway until Ctrl+C.
pub async fn run_gateway(host: &str, port: u16, config: Config) -> Result<()> {
    let state = AppState::from_config(&config);

    if is_public_bind(host) && !state.agent_key.require_key() {
        tracing::warn!(
            "Gateway binds to {host} without gateway.api_key; any client can link as the agent. \
             Set API_KEY or [gateway] api_key in config.toml."
        );
    }

    // TLS material is read before binding so a bad path fails fast.
    let acceptor = config
        .gateway
        .tls_paths()
        .map(|(cert, key)| tls::load_acceptor(cert, key))
        .transpose()
        .context("Failed to load TLS certificate or key")?;

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind gateway to {addr}"))?;
    let local_addr = listener.local_addr()?;
    let scheme = if acceptor.is_some() { "https" } else { "http" };

    tracing::info!("Relay gateway listening on {scheme}://{local_addr}");
    tracing::info!("  POST /alice/webhook  Alice skill webhook");
    tracing::info!("  GET  /ws            PC agent WebSocket");
    tracing::info!("  GET  /health        health check");
    tracing::info!(
        "  Reply timeout: {}s, agent key: {}",
        config.gateway.reply_timeout_secs,
        if state.agent_key.require_key() {
            "required"
        } else {
            "DISABLED"
        }
    );

    let app = build_router(state);

    match acceptor {
        Some(acceptor) => tls::serve_tls(listener, acceptor, app, shutdown_signal()).await?,
        None => {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
    }

    tracing::info!("Relay gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// GET /health, always public
async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "ok",
        "agent_connected": state.relay.is_agent_connected(),
        "pending": state.relay.registry().len(),
    });
    Json(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::link::tests::RecordingConnection;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState::new(
            Arc::new(Relay::new(Duration::from_secs(4))),
            AgentKeyGuard::new(Some("s3cret")),
        )
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let payload = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&payload).unwrap()
    }

    #[test]
    fn security_body_limit_is_64kb() {
        assert_eq!(MAX_BODY_SIZE, 65_536);
    }

    #[test]
    fn security_timeout_exceeds_reply_timeout() {
        assert!(REQUEST_TIMEOUT_SECS > Config::default().gateway.reply_timeout_secs);
    }

    #[test]
    fn app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn state_from_config_uses_reply_timeout_and_key() {
        let mut config = Config::default();
        config.gateway.reply_timeout_secs = 9;
        config.gateway.api_key = Some("k".into());

        let state = AppState::from_config(&config);
        assert_eq!(state.relay.reply_timeout(), Duration::from_secs(9));
        assert!(state.agent_key.require_key());
    }

    #[tokio::test]
    async fn health_reports_agent_link() {
        let state = test_state();
        let app = build_router(state.clone());

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["agent_connected"], false);

        state
            .relay
            .link()
            .install(Box::new(RecordingConnection::default()))
            .await;
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["agent_connected"], true);
    }

    #[tokio::test]
    async fn webhook_rejects_malformed_json() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::post("/alice/webhook")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_rejects_get() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/alice/webhook")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn webhook_greets_new_session_with_default_version() {
        let app = build_router(test_state());
        let body = serde_json::json!({
            "request": {"command": "", "original_utterance": "", "type": "SimpleUtterance"},
            "session": {"new": true, "session_id": "S1", "message_id": 0}
        });
        let response = app
            .oneshot(
                Request::post("/alice/webhook")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["response"]["text"], alice::GREETING_TEXT);
        assert_eq!(json["response"]["end_session"], false);
        assert_eq!(json["version"], "1.0");
    }

    #[tokio::test]
    async fn webhook_without_agent_is_unavailable() {
        let app = build_router(test_state());
        let body = serde_json::json!({
            "request": {"command": "open browser"},
            "session": {"new": false, "session_id": "S1", "message_id": 1},
            "version": "1.0"
        });
        let response = app
            .oneshot(
                Request::post("/alice/webhook")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await["response"]["text"],
            alice::AGENT_UNAVAILABLE_TEXT
        );
    }

    #[tokio::test]
    async fn ws_rejects_wrong_key_before_upgrade() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::get("/ws?key=wrong")
                    .header(header::CONNECTION, "upgrade")
                    .header(header::UPGRADE, "websocket")
                    .header(header::SEC_WEBSOCKET_VERSION, "13")
                    .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
