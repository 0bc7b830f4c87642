//! Wallet lifecycle events.
//!
//! External collaborators subscribe to cascade deletes, seed accounts
//! after a restore, and mirror state to the UI. Delivery is best-effort
//! broadcast; emitting with no subscribers is not an error.

use tokio::sync::broadcast;

use crate::id::Xid;
use crate::wallet::Wallet;

/// Events emitted by the wallet core.
#[derive(Clone, Debug)]
pub enum WalletEvent {
    /// A wallet was inserted by a backup restore (topic `wallet:restored`).
    /// Collaborators use this to seed an initial account.
    Restored(Wallet),
    /// A wallet and all its shares were deleted (topic `wallet:deleted`).
    Deleted(Xid),
    /// A delete was requested by an outer layer and the owner of the
    /// wallet row should act on it (topic `wallet:delete`).
    DeleteRequested(Xid),
    /// An account was deleted (topic `account:delete`).
    AccountDeleted(Xid),
}

impl WalletEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            WalletEvent::Restored(_) => "wallet:restored",
            WalletEvent::Deleted(_) => "wallet:deleted",
            WalletEvent::DeleteRequested(_) => "wallet:delete",
            WalletEvent::AccountDeleted(_) => "account:delete",
        }
    }
}

/// Broadcast hub for [`WalletEvent`].
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<WalletEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn emit(&self, event: WalletEvent) {
        tracing::debug!(topic = event.topic(), "emit");
        // No receivers is fine; events are advisory.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_subscribers() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe();
        let id = Xid::new("wlt");
        hub.emit(WalletEvent::Deleted(id.clone()));
        match rx.recv().await.unwrap() {
            WalletEvent::Deleted(got) => assert_eq!(got, id),
            other => panic!("unexpected event {}", other.topic()),
        }
    }

    #[test]
    fn emitting_without_subscribers_is_ok() {
        let hub = EventHub::new();
        hub.emit(WalletEvent::DeleteRequested(Xid::new("wlt")));
    }
}
