//! Request/reply correlation between webhook callers and the linked agent.
//!
//! ```text
//! webhook ──forward──▸ AgentLink ──{id,text}──▸ agent
//!    ▴                                            │
//!    └──── PendingRegistry ◂──resolve──{id,text}──┘
//! ```
//!
//! The registry and link are independent lock domains; no operation holds
//! both at once.

pub mod link;
pub mod registry;

pub use link::{AgentConnection, AgentLink, ConnectionId, LinkError};
pub use registry::{Conduit, PendingRegistry};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Wire frame exchanged with the agent in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentFrame {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
}

impl AgentFrame {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("no agent connected")]
    NoAgentConnected,

    #[error("failed to deliver command to agent: {0}")]
    DeliveryFailed(String),

    #[error("agent did not reply within {0:?}")]
    ReplyTimeout(Duration),

    #[error("failed to encode agent frame: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<LinkError> for RelayError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::NoAgentConnected => Self::NoAgentConnected,
            LinkError::Transport(e) => Self::DeliveryFailed(format!("{e:#}")),
        }
    }
}

/// Forwards commands to the agent and waits for the correlated reply.
#[derive(Debug)]
pub struct Relay {
    registry: Arc<PendingRegistry>,
    link: Arc<AgentLink>,
    reply_timeout: Duration,
}

impl Relay {
    pub fn new(reply_timeout: Duration) -> Self {
        Self::with_parts(
            Arc::new(PendingRegistry::new()),
            Arc::new(AgentLink::new()),
            reply_timeout,
        )
    }

    pub fn with_parts(
        registry: Arc<PendingRegistry>,
        link: Arc<AgentLink>,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            link,
            reply_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<PendingRegistry> {
        &self.registry
    }

    pub fn link(&self) -> &Arc<AgentLink> {
        &self.link
    }

    pub fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    pub fn is_agent_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Send `command` to the agent under `id` and wait for its reply.
    ///
    /// Fails fast with [`RelayError::NoAgentConnected`] before touching the
    /// registry. Otherwise the registry entry lives exactly as long as this
    /// call (or its future, if the caller drops it).
    ///
    /// One deadline covers both the frame write and the reply wait; a write
    /// still pending at the deadline is dropped, releasing the link lock.
    pub async fn forward(&self, id: &str, command: &str) -> Result<String, RelayError> {
        if !self.link.is_connected() {
            return Err(RelayError::NoAgentConnected);
        }

        let deadline = Instant::now() + self.reply_timeout;
        let (conduit, _guard) = self.registry.register_guarded(id);

        let frame = serde_json::to_string(&AgentFrame::new(id, command))?;
        match tokio::time::timeout_at(deadline, self.link.send(frame)).await {
            Ok(sent) => sent?,
            Err(_) => {
                tracing::warn!(id, "Agent write did not finish before the reply deadline");
                return Err(RelayError::DeliveryFailed(
                    "agent write timed out".to_string(),
                ));
            }
        }

        let reply = async {
            match conduit.await {
                Ok(reply) => reply,
                // Entry was overwritten by a newer request with the same id.
                // This waiter is not signalled; it runs out its own deadline.
                Err(_) => std::future::pending().await,
            }
        };

        tokio::time::timeout_at(deadline, reply)
            .await
            .map_err(|_| RelayError::ReplyTimeout(self.reply_timeout))
    }

    /// Hand an inbound agent frame to whoever is waiting for it.
    pub fn dispatch_reply(&self, frame: AgentFrame) -> bool {
        self.registry.resolve(&frame.id, frame.text)
    }
}
