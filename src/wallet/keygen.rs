//! Distributed key generation orchestration.
//!
//! One local party per requested share. Pre-params are generated up
//! front (the slow part, reported through the progress sink), then all
//! parties are started concurrently and the router carries the protocol
//! until every party delivered its save-data. Only then is anything
//! sealed; a failure before sealing leaves no persistent state. A
//! RemoteKey share is generated locally like the others and sealed to
//! the remote fleet when the run completes.

use std::collections::HashMap;
use std::sync::Arc;

use rand::RngCore;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use crate::cipher::{CredentialKind, KeyDescription};
use crate::env::Env;
use crate::error::WalletError;
use crate::progress::ProgressSink;
use crate::protocol::keygen::KeygenParty;
use crate::protocol::{PartyId, PeerContext, PreParams};
use crate::transport::{router, Party, PartyMap};
use crate::util;
use crate::wallet::{join_failure, Wallet, WalletKey, CURVE_SECP256K1};

impl Wallet {
    /// Generate the wallet's distributed key for the given share
    /// descriptions. Fills in curve, pubkey, chaincode and the sealed
    /// share set; persisting is the caller's step.
    pub async fn initialize(
        &mut self,
        env: &Env,
        descs: &[KeyDescription],
        progress: &ProgressSink,
    ) -> Result<(), WalletError> {
        let n = descs.len();
        if n == 0 {
            return Err(WalletError::InvalidConfiguration("at least one key is required".into()));
        }
        if self.threshold >= n {
            return Err(WalletError::InvalidConfiguration("threshold too high".into()));
        }
        let remotes = descs.iter().filter(|d| d.kind() == CredentialKind::RemoteKey).count();
        if remotes > 1 {
            return Err(WalletError::InvalidConfiguration(
                "at most one RemoteKey share is supported".into(),
            ));
        }

        // Per-share pre-params; the expensive stretch of the operation.
        let threshold = self.threshold;
        let mut keys = Vec::with_capacity(n);
        for (i, desc) in descs.iter().enumerate() {
            tracing::info!("generating key {}/{}", i + 1, n);
            progress.emit(n + 1, i + 1);
            let pre = tokio::task::spawn_blocking(move || PreParams::generate(threshold))
                .await
                .map_err(|e| join_failure(env, "pre-param generation", e))?;
            keys.push(WalletKey::create(&self.id, desc.kind(), self.gen, pre));
        }

        tracing::info!("producing final");
        progress.emit(n + 1, n + 1);

        let ids: Vec<PartyId> = keys.iter().map(|k| k.party_id()).collect();
        let ctx = PeerContext::new(ids)?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let mut parties: HashMap<String, Arc<dyn Party>> = HashMap::new();
        let mut ends = Vec::with_capacity(n);
        for key in &mut keys {
            let (end_tx, end_rx) = oneshot::channel();
            let pre = key
                .pre
                .take()
                .ok_or_else(|| WalletError::ProtocolAborted("pre-params missing".into()))?;
            let party = KeygenParty::new(
                key.party_id(),
                ctx.clone(),
                threshold,
                pre,
                out_tx.clone(),
                end_tx,
            )?;
            parties.insert(key.id.to_string(), party);
            ends.push(end_rx);
        }
        drop(out_tx);

        let parties: PartyMap = Arc::new(parties);
        let _router = router::spawn(parties.clone(), out_rx);

        // Start everyone concurrently; the first start error aborts.
        let mut starts = JoinSet::new();
        for party in parties.values() {
            let party = party.clone();
            starts.spawn(async move { party.start().await });
        }
        while let Some(res) = starts.join_next().await {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(join_failure(env, "keygen party start", e)),
            }
        }

        // Chaincode entropy for HD derivation.
        let mut chaincode = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut chaincode);

        // Wait for every party's terminal save-data.
        for (key, end) in keys.iter_mut().zip(ends) {
            let sdata = end.await.map_err(|_| {
                WalletError::ProtocolAborted("keygen party terminated without save-data".into())
            })?;
            key.sdata = Some(sdata);
        }

        // Every share must report the same joint public key.
        let first = keys[0]
            .sdata
            .as_ref()
            .ok_or_else(|| WalletError::ProtocolAborted("missing save-data".into()))?;
        let joint_pubkey = first.public_key.clone();
        let pubkey_bytes = first.public_key_bytes()?;
        if keys
            .iter()
            .any(|k| k.sdata.as_ref().map(|s| &s.public_key) != Some(&joint_pubkey))
        {
            return Err(WalletError::ProtocolAborted(
                "parties disagree on the joint public key".into(),
            ));
        }

        self.pubkey = util::b64(&pubkey_bytes);
        self.chaincode = util::b64(&chaincode);
        self.curve = CURVE_SECP256K1.to_string();

        // Seal each share under its credential; plaintext state is
        // dropped as soon as the ciphertext exists.
        for (i, (key, desc)) in keys.iter_mut().zip(descs).enumerate() {
            key.seal(env, desc).await.map_err(|e| {
                WalletError::ProtocolAborted(format!(
                    "failed to encrypt wallet key {}/{} of type {}: {e}",
                    i + 1,
                    n,
                    desc.kind()
                ))
            })?;
            key.sdata = None;
        }
        self.keys = keys;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn initialize_validates_inputs() {
        let env = Env::in_memory();

        let mut w = Wallet::new("w", 0);
        let err = w.initialize(&env, &[], &ProgressSink::none()).await.unwrap_err();
        assert!(matches!(err, WalletError::InvalidConfiguration(_)));

        let mut w = Wallet::new("w", 3);
        let descs = vec![KeyDescription::plain(); 3];
        let err = w.initialize(&env, &descs, &ProgressSink::none()).await.unwrap_err();
        assert!(matches!(err, WalletError::InvalidConfiguration(_)));

        let mut w = Wallet::new("w", 1);
        let descs = vec![
            KeyDescription::remote("sess-a"),
            KeyDescription::remote("sess-b"),
            KeyDescription::plain(),
        ];
        let err = w.initialize(&env, &descs, &ProgressSink::none()).await.unwrap_err();
        assert!(matches!(err, WalletError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn initialize_emits_progress_and_sets_wallet_fields() {
        use parking_lot::Mutex;

        let env = Env::in_memory();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            ProgressSink::new(move |p| seen.lock().push((p.count, p.running)))
        };

        let mut w = Wallet::new("progress", 1);
        let descs = vec![KeyDescription::plain(); 3];
        w.initialize(&env, &descs, &sink).await.unwrap();

        assert_eq!(*seen.lock(), vec![(4, 1), (4, 2), (4, 3), (4, 4)]);
        assert_eq!(w.curve, CURVE_SECP256K1);
        assert_eq!(w.keys.len(), 3);
        assert_eq!(util::b64_decode(&w.pubkey).unwrap().len(), 33);
        assert_eq!(util::b64_decode(&w.chaincode).unwrap().len(), 32);
        assert!(w.keys.iter().all(|k| k.gen == 0 && !k.data.is_empty()));
    }
}
