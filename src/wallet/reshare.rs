//! Reshare orchestration: rotate a wallet's shares to a new set.
//!
//! The old committee unlocks its shares (or connects the relay session
//! for the remotely-held one) and the new committee receives fresh
//! shares of the same key. Every party is started before any message is
//! routed, the first start error wins, and nothing is persisted until
//! every new share holds verified save-data; the swap then bumps the
//! generation and writes shares first, wallet last. The joint public key
//! and chaincode are invariants of the wallet and are checked, never
//! recomputed.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use crate::cipher::{Credential, CredentialKind, KeyDescription};
use crate::env::Env;
use crate::error::WalletError;
use crate::progress::ProgressSink;
use crate::protocol::reshare::{ReshareParams, ReshareParty};
use crate::protocol::{Committee, PeerContext, PreParams};
use crate::transport::remote::{RemoteParty, SessionInit};
use crate::transport::{router, Party, PartyMap};
use crate::util;
use crate::wallet::{join_failure, Wallet, WalletKey, CURVE_SECP256K1};

impl Wallet {
    /// Produce a new share set for this wallet, replacing the old one.
    pub async fn reshare(
        &mut self,
        env: &Env,
        old_keys: &[KeyDescription],
        new_keys: &[KeyDescription],
        progress: &ProgressSink,
    ) -> Result<(), WalletError> {
        if self.curve != CURVE_SECP256K1 {
            return Err(WalletError::InvalidConfiguration(format!(
                "unknown curve {}",
                self.curve
            )));
        }
        let nk = new_keys.len();
        if nk == 0 {
            return Err(WalletError::InvalidConfiguration("at least one key is required".into()));
        }
        if self.threshold >= nk {
            return Err(WalletError::InvalidConfiguration("threshold too high".into()));
        }
        if new_keys.iter().filter(|d| d.kind() == CredentialKind::RemoteKey).count() > 1 {
            return Err(WalletError::InvalidConfiguration(
                "at most one RemoteKey share is supported".into(),
            ));
        }

        // Old committee: every currently active share participates.
        let mut old_shares = Vec::with_capacity(old_keys.len());
        for desc in old_keys {
            let id = desc.id.as_ref().ok_or_else(|| {
                WalletError::InvalidConfiguration("key description missing its share id".into())
            })?;
            let share = self
                .get_key(&id.to_string())
                .ok_or_else(|| WalletError::NotFound(format!("could not find key id={id}")))?
                .clone();
            old_shares.push((share, desc));
        }
        let old_ctx = PeerContext::new(old_shares.iter().map(|(s, _)| s.party_id()).collect())?;

        // New shares with fresh ids and pre-params, stamped with the next
        // generation.
        let next_gen = self.gen + 1;
        let threshold = self.threshold;
        let mut new_wkeys = Vec::with_capacity(nk);
        for (i, desc) in new_keys.iter().enumerate() {
            tracing::info!("generating key {}/{}", i + 1, nk);
            progress.emit(nk + 1, i + 1);
            let pre = tokio::task::spawn_blocking(move || PreParams::generate(threshold))
                .await
                .map_err(|e| join_failure(env, "pre-param generation", e))?;
            new_wkeys.push(WalletKey::create(&self.id, desc.kind(), next_gen, pre));
        }
        progress.emit(nk + 1, nk + 1);

        let new_ctx = PeerContext::new(new_wkeys.iter().map(|k| k.party_id()).collect())?;
        tracing::info!(
            old = old_ctx.len(),
            new = new_ctx.len(),
            "producing final"
        );

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let mut parties: HashMap<String, Arc<dyn Party>> = HashMap::new();
        let mut remotes: Vec<Arc<RemoteParty>> = Vec::new();
        let mut ends = Vec::with_capacity(nk);

        for key in &mut new_wkeys {
            let (end_tx, end_rx) = oneshot::channel();
            let pre = key
                .pre
                .take()
                .ok_or_else(|| WalletError::ProtocolAborted("pre-params missing".into()))?;
            let party = ReshareParty::new_member(
                ReshareParams {
                    old_ctx: old_ctx.clone(),
                    new_ctx: new_ctx.clone(),
                    self_id: key.party_id(),
                    old_threshold: threshold,
                    new_threshold: threshold,
                    committee: Committee::New,
                },
                pre,
                out_tx.clone(),
                end_tx,
            )?;
            parties.insert(key.id.to_string(), party);
            ends.push(end_rx);
        }

        for (share, desc) in &old_shares {
            if share.kind == CredentialKind::RemoteKey {
                let Credential::RemoteKey(session) = &desc.credential else {
                    return Err(WalletError::InvalidConfiguration(
                        "remote share requires its RemoteKey session credential".into(),
                    ));
                };
                let info = SessionInit {
                    old_peers: old_ctx.parties().to_vec(),
                    new_peers: new_ctx.parties().to_vec(),
                    name: share.party_id(),
                    old_partycount: old_keys.len(),
                    new_partycount: nk,
                    old_threshold: threshold,
                    new_threshold: threshold,
                };
                tracing::info!(peer = %share.id, sid = %session, "initializing remote peer");
                let remote = RemoteParty::new(
                    info,
                    session,
                    env.remote.clone(),
                    env.relay.clone(),
                    env.relay_timeouts,
                );
                remotes.push(remote.clone());
                parties.insert(share.id.to_string(), remote);
                continue;
            }

            let sdata = share.unseal(desc)?;
            let party = ReshareParty::old(
                ReshareParams {
                    old_ctx: old_ctx.clone(),
                    new_ctx: new_ctx.clone(),
                    self_id: share.party_id(),
                    old_threshold: threshold,
                    new_threshold: threshold,
                    committee: Committee::Old,
                },
                sdata,
                out_tx.clone(),
            )?;
            parties.insert(share.id.to_string(), party);
        }
        drop(out_tx);

        let parties: PartyMap = Arc::new(parties);
        for remote in &remotes {
            remote.set_parties(parties.clone());
        }

        // Start everything and wait; the first failure aborts the run
        // before any message is routed.
        let mut starts = JoinSet::new();
        for party in parties.values() {
            let party = party.clone();
            starts.spawn(async move { party.start().await });
        }
        let mut first_error = None;
        while let Some(res) = starts.join_next().await {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "failed to start reshare party");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(join_failure(env, "reshare party start", e));
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        // Only route messages after everyone has started.
        let _router = router::spawn(parties.clone(), out_rx);

        // Every new party must deliver save-data.
        for (key, end) in new_wkeys.iter_mut().zip(ends) {
            let sdata = end.await.map_err(|_| {
                WalletError::ProtocolAborted("reshare party terminated without save-data".into())
            })?;
            key.sdata = Some(sdata);
        }

        // The joint public key is an invariant of the wallet.
        for key in &new_wkeys {
            let sdata = key
                .sdata
                .as_ref()
                .ok_or_else(|| WalletError::ProtocolAborted("missing save-data".into()))?;
            if util::b64(&sdata.public_key_bytes()?) != self.pubkey {
                return Err(WalletError::ProtocolAborted(
                    "reshare changed the joint public key".into(),
                ));
            }
        }

        // Seal the new shares, then swap atomically: generation bump,
        // shares first, wallet last.
        for (i, (key, desc)) in new_wkeys.iter_mut().zip(new_keys).enumerate() {
            key.seal(env, desc).await.map_err(|e| {
                WalletError::ProtocolAborted(format!(
                    "failed to encrypt wallet key {}/{nk} of type {}: {e}",
                    i + 1,
                    desc.kind()
                ))
            })?;
            key.sdata = None;
        }
        self.keys = new_wkeys;
        self.modified = Utc::now();
        self.save(env)
    }
}
