//! The capability aggregate handed to the core by the hosting process.
//!
//! Components depend on these narrow capabilities, never on a concrete
//! environment or a global. Cloning is cheap; everything inside is
//! shared.

use std::sync::Arc;

use crate::crash::{CrashLog, MemoryCrashLog};
use crate::events::EventHub;
use crate::store::memory::{MemoryAccountStore, MemoryShareStore, MemoryWalletStore};
use crate::store::{AccountStore, ShareStore, WalletStore};
use crate::transport::api::{OfflineSignApi, RemoteSignApi};
use crate::transport::relay::{OfflineRelay, RelayClient, RelayTimeouts};

/// Persistence, events, transport and crash logging, bundled.
#[derive(Clone)]
pub struct Env {
    pub wallets: Arc<dyn WalletStore>,
    pub shares: Arc<dyn ShareStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub events: EventHub,
    pub relay: Arc<dyn RelayClient>,
    pub remote: Arc<dyn RemoteSignApi>,
    pub crash: Arc<dyn CrashLog>,
    pub relay_timeouts: RelayTimeouts,
}

impl Env {
    /// Fully in-memory environment without a remote side; local-only
    /// flows work, remote ones fail with a transport error.
    pub fn in_memory() -> Self {
        Self {
            wallets: Arc::new(MemoryWalletStore::new()),
            shares: Arc::new(MemoryShareStore::new()),
            accounts: Arc::new(MemoryAccountStore::new()),
            events: EventHub::new(),
            relay: Arc::new(OfflineRelay),
            remote: Arc::new(OfflineSignApi),
            crash: Arc::new(MemoryCrashLog::new()),
            relay_timeouts: RelayTimeouts::default(),
        }
    }

    /// Same stores, but connected to a relay and the remote signing
    /// service.
    pub fn with_remote(
        mut self,
        relay: Arc<dyn RelayClient>,
        remote: Arc<dyn RemoteSignApi>,
    ) -> Self {
        self.relay = relay;
        self.remote = remote;
        self
    }

    pub fn with_relay_timeouts(mut self, timeouts: RelayTimeouts) -> Self {
        self.relay_timeouts = timeouts;
        self
    }
}
