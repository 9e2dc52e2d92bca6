//! Ownership of the single agent connection.
//!
//! At most one agent is linked at a time. A newly connected agent always
//! wins: the previous connection is closed under the link lock before the
//! new one is installed, so no frame can be written to a half-closed socket.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Upper bound on closing a superseded connection while the link is locked.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Write half of an agent connection.
#[async_trait]
pub trait AgentConnection: Send {
    /// Write one text frame.
    async fn send_text(&mut self, text: String) -> anyhow::Result<()>;

    /// Close the connection. Errors are not interesting at this point.
    async fn close(&mut self);
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("no agent connected")]
    NoAgentConnected,

    #[error(transparent)]
    Transport(anyhow::Error),
}

/// Identity of one installed connection, used to detect stale teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent#{}", self.0)
    }
}

struct Installed {
    id: ConnectionId,
    conn: Box<dyn AgentConnection>,
}

/// Holds the currently linked agent connection.
pub struct AgentLink {
    slot: Mutex<Option<Installed>>,
    /// Mirror of the installed id (0 when empty) for lock-free status reads.
    active: AtomicU64,
    next_id: AtomicU64,
}

impl Default for AgentLink {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AgentLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentLink")
            .field("active", &self.active.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl AgentLink {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            active: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    /// Close whatever is linked and install `conn` in its place.
    pub async fn install(&self, conn: Box<dyn AgentConnection>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut slot = self.slot.lock().await;

        if let Some(mut previous) = slot.take() {
            tracing::info!(previous = %previous.id, next = %id, "Superseding agent connection");
            if tokio::time::timeout(CLOSE_TIMEOUT, previous.conn.close())
                .await
                .is_err()
            {
                tracing::warn!(previous = %previous.id, "Timed out closing superseded agent connection");
            }
        }

        *slot = Some(Installed { id, conn });
        self.active.store(id.0, Ordering::SeqCst);
        id
    }

    /// Write one frame to the linked agent.
    ///
    /// Writes are serialized under the link lock. The write itself is not
    /// bounded here; callers race it against their own deadline.
    pub async fn send(&self, text: String) -> Result<(), LinkError> {
        let mut slot = self.slot.lock().await;
        let installed = slot.as_mut().ok_or(LinkError::NoAgentConnected)?;
        installed
            .conn
            .send_text(text)
            .await
            .map_err(LinkError::Transport)
    }

    /// Whether an agent is linked right now. Never blocks.
    pub fn is_connected(&self) -> bool {
        self.active.load(Ordering::SeqCst) != 0
    }

    /// Unlink `id` if it is still the installed connection.
    ///
    /// Returns `false` when a newer connection has already replaced it, in
    /// which case the link is left untouched.
    pub async fn clear(&self, id: ConnectionId) -> bool {
        let mut slot = self.slot.lock().await;
        match slot.as_ref() {
            Some(installed) if installed.id == id => {
                *slot = None;
                self.active.store(0, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }
}
