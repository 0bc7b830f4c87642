//! Pending-request registry for the external IPC layer.
//!
//! A single mutex guards the `{request id → reply channel}` map. Opening
//! a new entry for an id that is already present closes the previous
//! channel, so a stale waiter observes a drop instead of hanging forever.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Process-wide registry of in-flight requests.
#[derive(Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<String, oneshot::Sender<serde_json::Value>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request id and obtain the receiver for its reply.
    /// A previous entry under the same id is closed.
    pub fn open(&self, id: &str) -> oneshot::Receiver<serde_json::Value> {
        let (tx, rx) = oneshot::channel();
        if self.inner.lock().insert(id.to_string(), tx).is_some() {
            tracing::warn!(id, "pending request replaced");
        }
        rx
    }

    /// Deliver a reply. Returns false when nobody is waiting.
    pub fn complete(&self, id: &str, value: serde_json::Value) -> bool {
        match self.inner.lock().remove(id) {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Drop a registration without replying.
    pub fn cancel(&self, id: &str) {
        self.inner.lock().remove(id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
