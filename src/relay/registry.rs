//! In-flight request registry.
//!
//! Every webhook request that is forwarded to the agent parks a one-shot
//! sender here under its correlation id. The agent listener resolves the id
//! when the matching reply frame arrives; the waiting request removes its
//! entry when it stops waiting, whether it got a reply or not.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Receiving half of a correlation entry. Yields at most one reply.
pub type Conduit = oneshot::Receiver<String>;

#[derive(Debug)]
struct Entry {
    /// Distinguishes successive registrations of the same id.
    token: u64,
    tx: oneshot::Sender<String>,
}

/// Maps correlation ids to single-use reply conduits.
#[derive(Debug, Default)]
pub struct PendingRegistry {
    pending: Mutex<HashMap<String, Entry>>,
    next_token: AtomicU64,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh conduit under `id` and return its receiving half.
    ///
    /// A live entry with the same id is replaced without delivering anything
    /// to it; its conduit just closes.
    pub fn register(&self, id: &str) -> Conduit {
        self.insert(id).1
    }

    /// Like [`register`](Self::register), plus a guard that removes this
    /// particular entry when dropped. A later registration under the same id
    /// is left alone.
    pub(crate) fn register_guarded(self: &Arc<Self>, id: &str) -> (Conduit, PendingGuard) {
        let (token, conduit) = self.insert(id);
        let guard = PendingGuard {
            registry: Arc::clone(self),
            id: id.to_owned(),
            token,
        };
        (conduit, guard)
    }

    fn insert(&self, id: &str) -> (u64, Conduit) {
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        if self
            .pending
            .lock()
            .insert(id.to_owned(), Entry { token, tx })
            .is_some()
        {
            tracing::debug!(id, "Correlation id reused while still pending; replaced entry");
        }
        (token, rx)
    }

    /// Deliver `payload` to the waiter registered under `id`.
    ///
    /// Returns `false` when nobody is waiting: the id was never registered,
    /// was already resolved, or its waiter gave up. The payload is dropped.
    pub fn resolve(&self, id: &str, payload: String) -> bool {
        let entry = self.pending.lock().remove(id);
        match entry {
            Some(entry) => entry.tx.send(payload).is_ok(),
            None => {
                tracing::debug!(id, "No pending request for agent reply; dropped");
                false
            }
        }
    }

    /// Delete the entry for `id`. No-op when absent.
    pub fn remove(&self, id: &str) {
        self.pending.lock().remove(id);
    }

    fn remove_token(&self, id: &str, token: u64) {
        let mut pending = self.pending.lock();
        if pending.get(id).is_some_and(|entry| entry.token == token) {
            pending.remove(id);
        }
    }

    /// Whether a waiter is parked under `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.pending.lock().contains_key(id)
    }

    /// Number of requests currently waiting for a reply.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// True when no request is waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

/// Removes its registry entry when dropped.
///
/// Held by the forwarding request for the whole wait, so the entry is gone
/// on every exit path, including cancellation of the request future.
pub(crate) struct PendingGuard {
    registry: Arc<PendingRegistry>,
    id: String,
    token: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.registry.remove_token(&self.id, self.token);
    }
}
