//! Relay client abstraction.
//!
//! The relay is the end-to-end encrypted message bus that proxies MPC
//! traffic to the remote share holder. Its cryptographic envelope is
//! provided by the hosting process; the core only needs query/send and a
//! per-session inbound subscription, plus the address conventions
//! implemented by [`super::remote::RemoteParty`].

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::WalletError;

/// One inbound relay message. Frames that were not end-to-end encrypted
/// are delivered with `encrypted = false` and must be dropped.
#[derive(Clone, Debug)]
pub struct RelayFrame {
    /// Sender path, `<peer>/walletsign/<session>[/broadcast]`.
    pub sender: String,
    /// Recipient path, `<local>/<session>/{all|<party_id>}`.
    pub recipient: String,
    pub body: Vec<u8>,
    pub encrypted: bool,
}

/// Handle to the relay connection supplied by the hosting process.
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Round-trip query (ping, session init).
    async fn query(&self, target: &str, body: Vec<u8>) -> Result<Vec<u8>, WalletError>;

    /// One-way send with an explicit from-path.
    async fn send_from(&self, target: &str, body: Vec<u8>, from: &str) -> Result<(), WalletError>;

    /// Subscribe to inbound frames for a session id.
    fn subscribe(&self, session: &str) -> mpsc::UnboundedReceiver<RelayFrame>;
}

/// Deadlines of the remote session handshake. Production values follow
/// the relay's behaviour; tests shorten them.
#[derive(Clone, Copy, Debug)]
pub struct RelayTimeouts {
    /// Total budget for finding a live peer via ping.
    pub select_peer: Duration,
    /// Budget for the session init round-trip.
    pub init: Duration,
    /// Settle time after a successful ping; the relay needs a moment to
    /// register the route.
    pub settle: Duration,
}

impl Default for RelayTimeouts {
    fn default() -> Self {
        Self {
            select_peer: Duration::from_secs(30),
            init: Duration::from_secs(15),
            settle: Duration::from_millis(500),
        }
    }
}

/// Placeholder relay for deployments without a remote share: every
/// operation fails with a transport error.
pub struct OfflineRelay;

#[async_trait]
impl RelayClient for OfflineRelay {
    async fn query(&self, _target: &str, _body: Vec<u8>) -> Result<Vec<u8>, WalletError> {
        Err(WalletError::TransportFailure("no relay configured".into()))
    }

    async fn send_from(
        &self,
        _target: &str,
        _body: Vec<u8>,
        _from: &str,
    ) -> Result<(), WalletError> {
        Err(WalletError::TransportFailure("no relay configured".into()))
    }

    fn subscribe(&self, _session: &str) -> mpsc::UnboundedReceiver<RelayFrame> {
        // A channel whose sender is gone: the subscription just ends.
        let (_tx, rx) = mpsc::unbounded_channel();
        rx
    }
}
