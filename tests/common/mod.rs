//! Test doubles for the remote side: an in-process relay and a
//! simulated remote signing service that holds the fleet key, stores
//! uploaded share blobs and runs the remote protocol party when a
//! session is initialised.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ed25519_dalek::pkcs8::EncodePublicKey;
use ed25519_dalek::SigningKey;
use parking_lot::Mutex;
use rand::RngCore;
use tokio::sync::mpsc;

use libwallet::cipher::envelope;
use libwallet::error::WalletError;
use libwallet::protocol::reshare::{ReshareParams, ReshareParty};
use libwallet::protocol::{Committee, Outgoing, PartyId, PeerContext, SaveData};
use libwallet::transport::api::{RemoteSession, RemoteSignApi};
use libwallet::transport::relay::{RelayClient, RelayFrame};
use libwallet::transport::remote::{RemoteParty, SessionInit};
use libwallet::transport::Party;
use libwallet::util;

/// In-process relay: queries and sends go to the attached service,
/// inbound frames for the local side come back per session.
pub struct MemoryRelay {
    sim: Mutex<Option<Arc<RemoteSim>>>,
    subscribers: Mutex<HashMap<String, mpsc::UnboundedSender<RelayFrame>>>,
    /// When set, queries hang forever, like a relay with no live peers.
    unresponsive: bool,
}

impl MemoryRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sim: Mutex::new(None),
            subscribers: Mutex::new(HashMap::new()),
            unresponsive: false,
        })
    }

    pub fn unresponsive() -> Arc<Self> {
        Arc::new(Self {
            sim: Mutex::new(None),
            subscribers: Mutex::new(HashMap::new()),
            unresponsive: true,
        })
    }

    pub fn attach(&self, sim: Arc<RemoteSim>) {
        *self.sim.lock() = Some(sim);
    }

    pub fn push_frame(&self, session: &str, frame: RelayFrame) {
        if let Some(tx) = self.subscribers.lock().get(session) {
            let _ = tx.send(frame);
        }
    }
}

#[async_trait]
impl RelayClient for MemoryRelay {
    async fn query(&self, target: &str, body: Vec<u8>) -> Result<Vec<u8>, WalletError> {
        if self.unresponsive {
            std::future::pending::<()>().await;
        }
        let sim = self
            .sim
            .lock()
            .clone()
            .ok_or_else(|| WalletError::TransportFailure("no peer attached".into()))?;
        sim.handle_query(target, body).await
    }

    async fn send_from(&self, target: &str, body: Vec<u8>, from: &str) -> Result<(), WalletError> {
        let sim = self
            .sim
            .lock()
            .clone()
            .ok_or_else(|| WalletError::TransportFailure("no peer attached".into()))?;
        sim.handle_send(target, body, from).await
    }

    fn subscribe(&self, session: &str) -> mpsc::UnboundedReceiver<RelayFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().insert(session.to_string(), tx);
        rx
    }
}

struct ActiveParty {
    party: Arc<dyn Party>,
    init: SessionInit,
    sid: String,
}

/// The simulated remote signing service: one fleet identity, uploaded
/// share blobs by session id, out-of-band codes, and the remote protocol
/// party once a session init arrives.
pub struct RemoteSim {
    fleet_key: SigningKey,
    relay: Mutex<Option<Arc<MemoryRelay>>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    codes: Mutex<HashMap<String, String>>,
    active: Mutex<Option<Arc<ActiveParty>>>,
}

impl RemoteSim {
    pub fn new() -> Arc<Self> {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Arc::new(Self {
            fleet_key: SigningKey::from_bytes(&seed),
            relay: Mutex::new(None),
            blobs: Mutex::new(HashMap::new()),
            codes: Mutex::new(HashMap::new()),
            active: Mutex::new(None),
        })
    }

    pub fn set_relay(&self, relay: Arc<MemoryRelay>) {
        *self.relay.lock() = Some(relay);
    }

    /// The fleet identity card: base64url of the SPKI DER public key.
    pub fn identity_card(&self) -> String {
        let der = self
            .fleet_key
            .verifying_key()
            .to_public_key_der()
            .expect("ed25519 SPKI encoding");
        util::b64(der.as_bytes())
    }

    /// The relay address the local side will derive for this identity.
    pub fn address(&self) -> String {
        RemoteParty::relay_address(&self.identity_card()).expect("valid card")
    }

    pub fn has_blob(&self, session: &str) -> bool {
        self.blobs.lock().contains_key(session)
    }

    pub fn raw_blob(&self, session: &str) -> Option<Vec<u8>> {
        self.blobs.lock().get(session).cloned()
    }

    /// Open an uploaded blob the way the service would, with the fleet
    /// key.
    pub fn open_blob(&self, session: &str) -> Option<SaveData> {
        let blob = self.raw_blob(session)?;
        let plaintext = envelope::open(&blob, &self.fleet_key).ok()?;
        SaveData::from_json(&plaintext).ok()
    }

    async fn handle_query(&self, target: &str, body: Vec<u8>) -> Result<Vec<u8>, WalletError> {
        let addr = self.address();
        if target == format!("{addr}/ping") {
            return Ok(body); // echo the payload back
        }
        if let Some(rest) = target.strip_prefix(&format!("{addr}/walletsign/")) {
            if let Some(sid) = rest.strip_suffix("/init") {
                let init: SessionInit = serde_json::from_slice(&body).map_err(|e| {
                    WalletError::TransportFailure(format!("bad init packet: {e}"))
                })?;
                self.start_session(sid, init).await?;
                return Ok(b"OK".to_vec());
            }
        }
        Err(WalletError::TransportFailure(format!("no route for {target}")))
    }

    /// Open the stored blob for the session and run the old-committee
    /// party on this side of the relay.
    async fn start_session(&self, sid: &str, init: SessionInit) -> Result<(), WalletError> {
        let blob = self
            .blobs
            .lock()
            .get(sid)
            .cloned()
            .ok_or_else(|| WalletError::TransportFailure(format!("no share for session {sid}")))?;
        let plaintext = envelope::open(&blob, &self.fleet_key)?;
        let sdata = SaveData::from_json(&plaintext)?;

        let params = ReshareParams {
            old_ctx: PeerContext::new(init.old_peers.clone())?,
            new_ctx: PeerContext::new(init.new_peers.clone())?,
            self_id: init.name.clone(),
            old_threshold: init.old_threshold,
            new_threshold: init.new_threshold,
            committee: Committee::Old,
        };
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Outgoing>();
        let party = ReshareParty::old(params, sdata, out_tx)?;

        let relay = self
            .relay
            .lock()
            .clone()
            .ok_or_else(|| WalletError::TransportFailure("sim has no relay".into()))?;
        self.pump_outgoing(relay, sid.to_string(), out_rx);

        party.start().await?;
        *self.active.lock() = Some(Arc::new(ActiveParty {
            party,
            init,
            sid: sid.to_string(),
        }));
        Ok(())
    }

    /// Translate the remote party's outgoing messages into relay frames
    /// for the local side.
    fn pump_outgoing(
        &self,
        relay: Arc<MemoryRelay>,
        sid: String,
        mut out_rx: mpsc::UnboundedReceiver<Outgoing>,
    ) {
        let addr = self.address();
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                match &msg.to {
                    None => relay.push_frame(
                        &sid,
                        RelayFrame {
                            sender: format!("{addr}/walletsign/{sid}/broadcast"),
                            recipient: format!("local/{sid}/all"),
                            body: msg.body.clone(),
                            encrypted: true,
                        },
                    ),
                    Some(targets) => {
                        for target in targets {
                            relay.push_frame(
                                &sid,
                                RelayFrame {
                                    sender: format!("{addr}/walletsign/{sid}"),
                                    recipient: format!("local/{sid}/{target}"),
                                    body: msg.body.clone(),
                                    encrypted: true,
                                },
                            );
                        }
                    }
                }
            }
        });
    }

    async fn handle_send(&self, target: &str, body: Vec<u8>, from: &str) -> Result<(), WalletError> {
        let Some(active) = self.active.lock().clone() else {
            return Ok(()); // session not up yet, drop
        };
        if !target.contains(&format!("/walletsign/{}/", active.sid)) {
            return Ok(());
        }
        let is_broadcast = target.ends_with("/broadcast");
        let from_id = from.rsplit('/').next().unwrap_or_default();
        let from_party = active
            .init
            .old_peers
            .iter()
            .chain(active.init.new_peers.iter())
            .find(|p| p.id == from_id)
            .cloned()
            .unwrap_or(PartyId { id: from_id.to_string(), key: [0u8; 16] });
        let _ = active.party.update(&body, &from_party, is_broadcast).await;
        Ok(())
    }
}

#[async_trait]
impl RemoteSignApi for RemoteSim {
    async fn keys(&self) -> Result<Vec<String>, WalletError> {
        Ok(vec![self.identity_card()])
    }

    async fn new_session(&self, _number: &str) -> Result<RemoteSession, WalletError> {
        let mut raw = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut raw);
        let session = format!("elws-{}", hex::encode(raw));
        self.codes.lock().insert(session.clone(), "000000".to_string());
        Ok(RemoteSession {
            session,
            format: "all-digits".to_string(),
            length: 6,
        })
    }

    async fn verify(&self, session: &str, code: &str) -> Result<String, WalletError> {
        match self.codes.lock().get(session) {
            Some(expected) if expected == code => Ok(session.to_string()),
            _ => Err(WalletError::TransportFailure("bad verification code".into())),
        }
    }

    async fn set_generated_key(&self, data: &str, key: &str) -> Result<(), WalletError> {
        let blob = util::b64_decode(data)
            .map_err(|_| WalletError::TransportFailure("bad blob encoding".into()))?;
        self.blobs.lock().insert(key.to_string(), blob);
        Ok(())
    }

    async fn reshare(
        &self,
        key: &str,
        _threshold: usize,
        _count: usize,
    ) -> Result<RemoteSession, WalletError> {
        Ok(RemoteSession {
            session: key.to_string(),
            format: "all-digits".to_string(),
            length: 6,
        })
    }
}
