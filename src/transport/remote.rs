//! The remote party: stands in for the single remotely-held share.
//!
//! `start` performs the session handshake over the relay: enumerate the
//! fleet's identities, ping the relay address of each concurrently and
//! take the first that echoes a random payload, wait for the route to
//! settle, then post the session init packet. After that, `update`
//! translates outgoing wire bytes into relay sends and an inbound
//! dispatch task feeds relayed messages into the local party map.
//! Unencrypted frames, empty bodies and malformed recipients are
//! dropped.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::WalletError;
use crate::protocol::PartyId;
use crate::transport::api::{fetch_fleet, RemoteSignApi};
use crate::transport::relay::{RelayClient, RelayTimeouts};
use crate::transport::{Party, PartyMap};
use crate::util;

/// First packet of a remote session. The remote side uses it to build
/// its own protocol parameters; for signing sessions both peer lists
/// carry the quorum.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionInit {
    pub old_peers: Vec<PartyId>,
    pub new_peers: Vec<PartyId>,
    /// The remote share's own party id.
    pub name: PartyId,
    pub old_partycount: usize,
    pub new_partycount: usize,
    pub old_threshold: usize,
    pub new_threshold: usize,
}

pub struct RemoteParty {
    info: SessionInit,
    /// Opaque session id allocated by the remote service; doubles as the
    /// credential key of the remote share.
    sid: String,
    api: Arc<dyn RemoteSignApi>,
    relay: Arc<dyn RelayClient>,
    timeouts: RelayTimeouts,
    /// The run's full party map, set once all parties are constructed.
    parties: OnceLock<PartyMap>,
    peer: Mutex<Option<String>>,
    start_result: tokio::sync::Mutex<Option<Result<(), WalletError>>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteParty {
    pub fn new(
        info: SessionInit,
        sid: &str,
        api: Arc<dyn RemoteSignApi>,
        relay: Arc<dyn RelayClient>,
        timeouts: RelayTimeouts,
    ) -> Arc<Self> {
        Arc::new(Self {
            info,
            sid: sid.to_string(),
            api,
            relay,
            timeouts,
            parties: OnceLock::new(),
            peer: Mutex::new(None),
            start_result: tokio::sync::Mutex::new(None),
            dispatch: Mutex::new(None),
        })
    }

    /// Hand the party the run's full party map. Must happen before
    /// `start`, once every party of the run is constructed.
    pub fn set_parties(&self, parties: PartyMap) {
        let _ = self.parties.set(parties);
    }

    /// A fleet identity card hashes to its relay address.
    pub fn relay_address(identity_card: &str) -> Result<String, WalletError> {
        let raw = util::b64_decode(identity_card)
            .map_err(|_| WalletError::TransportFailure("bad identity card".into()))?;
        Ok(format!("k.{}", util::b64(&Sha256::digest(&raw))))
    }

    async fn select_peer(&self) -> Result<String, WalletError> {
        let cards = fetch_fleet(self.api.as_ref()).await?;
        let mut addresses = Vec::new();
        for card in &cards {
            match Self::relay_address(card) {
                Ok(addr) => addresses.push(addr),
                Err(e) => tracing::warn!(error = %e, "failed to parse peer identity"),
            }
        }
        if addresses.is_empty() {
            return Err(WalletError::TransportFailure("remote fleet is empty".into()));
        }

        let (tx, mut rx) = mpsc::channel::<String>(1);
        for addr in addresses {
            let relay = self.relay.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut payload = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut payload);
                match relay.query(&format!("{addr}/ping"), payload.to_vec()).await {
                    Ok(echo) if echo[..] == payload[..] => {
                        let _ = tx.try_send(addr);
                    }
                    Ok(_) => tracing::warn!(addr = %addr, "bad ping buffer"),
                    Err(e) => tracing::warn!(addr = %addr, error = %e, "ping failed"),
                }
            });
        }
        drop(tx);

        match timeout(self.timeouts.select_peer, rx.recv()).await {
            Ok(Some(peer)) => Ok(peer),
            Ok(None) => Err(WalletError::TransportFailure(
                "no relay peer answered the ping".into(),
            )),
            Err(_) => Err(WalletError::TransportFailure("peer selection timed out".into())),
        }
    }

    async fn run_init(&self) -> Result<(), WalletError> {
        // Dispatch first so nothing sent during the handshake is missed.
        self.spawn_dispatch();

        let peer = self.select_peer().await?;
        tracing::info!(peer = %peer, sid = %self.sid, "selected relay peer");
        tokio::time::sleep(self.timeouts.settle).await;

        let body = serde_json::to_vec(&self.info)
            .map_err(|e| WalletError::TransportFailure(format!("init encode: {e}")))?;
        timeout(
            self.timeouts.init,
            self.relay
                .query(&format!("{peer}/walletsign/{}/init", self.sid), body),
        )
        .await
        .map_err(|_| WalletError::TransportFailure("remote session init timed out".into()))?
        .map_err(|e| WalletError::TransportFailure(format!("failed to init remote: {e}")))?;

        *self.peer.lock() = Some(peer);
        tracing::info!(sid = %self.sid, "remote initialized, ready for protocol");
        Ok(())
    }

    fn spawn_dispatch(&self) {
        let Some(parties) = self.parties.get().cloned() else {
            tracing::warn!(sid = %self.sid, "remote party started without a party map");
            return;
        };
        let mut rx = self.relay.subscribe(&self.sid);
        let self_name = self.info.name.clone();

        let handle = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                // Only process end-to-end encrypted frames.
                if !frame.encrypted || frame.body.is_empty() {
                    continue;
                }
                let sender: Vec<&str> = frame.sender.split('/').collect();
                let is_broadcast = sender.len() >= 4 && sender[3] == "broadcast";
                let recipient: Vec<&str> = frame.recipient.split('/').collect();
                if recipient.len() < 3 {
                    tracing::warn!(recipient = %frame.recipient, "invalid recipient on relay message");
                    continue;
                }
                let dst = recipient[2];

                if dst == "all" {
                    for (id, party) in parties.iter() {
                        if *id == self_name.id {
                            continue; // never echo relay traffic back out
                        }
                        dispatch(party.clone(), frame.body.clone(), self_name.clone(), true);
                    }
                } else if let Some(party) = parties.get(dst) {
                    dispatch(party.clone(), frame.body.clone(), self_name.clone(), is_broadcast);
                } else {
                    tracing::warn!(dst, "relay message for unknown party");
                }
            }
        });
        *self.dispatch.lock() = Some(handle);
    }
}

fn dispatch(party: Arc<dyn Party>, body: Vec<u8>, from: PartyId, is_broadcast: bool) {
    tokio::spawn(async move {
        match party.update(&body, &from, is_broadcast).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!("failed to update peer: not accepted"),
            Err(e) => tracing::warn!(error = %e, "failed to update peer"),
        }
    });
}

impl Drop for RemoteParty {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatch.lock().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl Party for RemoteParty {
    async fn start(&self) -> Result<(), WalletError> {
        // Init-once gate: concurrent and repeated starts observe the
        // first outcome.
        let mut guard = self.start_result.lock().await;
        if let Some(result) = guard.as_ref() {
            return result.clone();
        }
        let result = self.run_init().await;
        *guard = Some(result.clone());
        result
    }

    async fn update(
        &self,
        wire: &[u8],
        from: &PartyId,
        is_broadcast: bool,
    ) -> Result<bool, WalletError> {
        let peer = self
            .peer
            .lock()
            .clone()
            .ok_or_else(|| WalletError::TransportFailure("remote session not initialised".into()))?;

        let suffix = if is_broadcast { "broadcast" } else { "single" };
        let target = format!("{peer}/walletsign/{}/{suffix}", self.sid);
        let sender = format!("/{}/{}", self.sid, from.id);
        tracing::debug!(to = %target, from = %sender, is_broadcast, "relaying protocol message");
        self.relay.send_from(&target, wire.to_vec(), &sender).await?;
        Ok(true)
    }
}
