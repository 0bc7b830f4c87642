//! Signing orchestration.
//!
//! A quorum of shares is unlocked with the caller's credentials and
//! driven through the signing protocol. Each worker posts its party's
//! outcome to a shared result channel; the first posted result wins and
//! a 15 second timer bounds the whole attempt. Workers run under crash
//! guards that file panics with the crash log, and the public `sign`
//! entry point does the same for the orchestration itself, so a caller
//! only ever sees a quotable crash id.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use k256::Scalar;
use tokio::sync::{mpsc, oneshot};

use crate::cipher::{Credential, CredentialKind, KeyDescription};
use crate::crash::panic_detail;
use crate::env::Env;
use crate::error::WalletError;
use crate::protocol::sign::SignParty;
use crate::protocol::PeerContext;
use crate::transport::remote::{RemoteParty, SessionInit};
use crate::transport::{router, Party, PartyMap};
use crate::wallet::{Wallet, CURVE_SECP256K1};

/// Hard deadline for one signing attempt.
const SIGN_TIMEOUT: Duration = Duration::from_secs(15);

/// Options for one signing call.
#[derive(Clone, Debug, Default)]
pub struct SignOptions {
    /// HD derivation offset produced by public derivation; the protocol
    /// adjusts the shared key by it so a child key signs without any
    /// share being touched.
    pub il: Option<Scalar>,
    /// Credentials of the participating shares, at least threshold+1.
    pub keys: Vec<KeyDescription>,
}

impl Wallet {
    /// Sign a digest with a quorum of shares, returning a DER-encoded
    /// ECDSA signature.
    pub async fn sign(
        &self,
        env: &Env,
        digest: &[u8],
        opts: &SignOptions,
    ) -> Result<Vec<u8>, WalletError> {
        match AssertUnwindSafe(self.sub_sign(env, digest, opts)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let detail = panic_detail(payload.as_ref());
                tracing::error!("panic: {detail}");
                let id = env.crash.log("signature main thread", &detail);
                Err(WalletError::PanicCaught(id.to_string()))
            }
        }
    }

    async fn sub_sign(
        &self,
        env: &Env,
        digest: &[u8],
        opts: &SignOptions,
    ) -> Result<Vec<u8>, WalletError> {
        if self.curve != CURVE_SECP256K1 {
            return Err(WalletError::InvalidConfiguration(format!(
                "unknown curve {}",
                self.curve
            )));
        }
        let quorum = opts.keys.len();
        if quorum < self.threshold + 1 {
            return Err(WalletError::InvalidConfiguration(format!(
                "signing requires at least {} keys, got {quorum}",
                self.threshold + 1
            )));
        }

        // Locate every participating share up front; an unknown id fails
        // the call before anything starts.
        let mut shares = Vec::with_capacity(quorum);
        for desc in &opts.keys {
            let id = desc.id.as_ref().ok_or_else(|| {
                WalletError::InvalidConfiguration("key description missing its share id".into())
            })?;
            let share = self
                .get_key(&id.to_string())
                .ok_or_else(|| WalletError::NotFound(format!("could not find key id={id}")))?;
            shares.push((share, desc));
        }
        let ctx = PeerContext::new(shares.iter().map(|(s, _)| s.party_id()).collect())?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (res_tx, mut res_rx) = mpsc::channel::<Result<Vec<u8>, WalletError>>(quorum + 1);

        let mut parties: HashMap<String, Arc<dyn Party>> = HashMap::new();
        let mut remotes: Vec<Arc<RemoteParty>> = Vec::new();
        let mut ends: Vec<(String, Option<oneshot::Receiver<Vec<u8>>>)> = Vec::new();

        for (share, desc) in &shares {
            if share.kind == CredentialKind::RemoteKey {
                let Credential::RemoteKey(session) = &desc.credential else {
                    return Err(WalletError::InvalidConfiguration(
                        "remote share requires its RemoteKey session credential".into(),
                    ));
                };
                let info = SessionInit {
                    old_peers: ctx.parties().to_vec(),
                    new_peers: ctx.parties().to_vec(),
                    name: share.party_id(),
                    old_partycount: quorum,
                    new_partycount: quorum,
                    old_threshold: self.threshold,
                    new_threshold: self.threshold,
                };
                let remote = RemoteParty::new(
                    info,
                    session,
                    env.remote.clone(),
                    env.relay.clone(),
                    env.relay_timeouts,
                );
                remotes.push(remote.clone());
                parties.insert(share.id.to_string(), remote);
                ends.push((share.id.to_string(), None));
            } else {
                let sdata = share.unseal(desc)?;
                let (end_tx, end_rx) = oneshot::channel();
                let party = SignParty::new(
                    share.party_id(),
                    ctx.clone(),
                    self.threshold,
                    digest,
                    sdata,
                    opts.il,
                    out_tx.clone(),
                    end_tx,
                )?;
                parties.insert(share.id.to_string(), party);
                ends.push((share.id.to_string(), Some(end_rx)));
            }
        }
        drop(out_tx);

        let parties: PartyMap = Arc::new(parties);
        for remote in &remotes {
            remote.set_parties(parties.clone());
        }
        let _router = router::spawn(parties.clone(), out_rx);

        // One worker per party: start it, await its result, post the
        // outcome. Remote completion is observed through the other
        // parties, so its worker only reports start failures.
        for (id, end) in ends {
            let party = parties
                .get(&id)
                .cloned()
                .ok_or_else(|| WalletError::ProtocolAborted("party map out of sync".into()))?;
            let res_tx = res_tx.clone();
            let crash = env.crash.clone();
            tokio::spawn(async move {
                let started = match AssertUnwindSafe(party.start()).catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => {
                        let crash_id =
                            crash.log("signing party thread", &panic_detail(payload.as_ref()));
                        let _ = res_tx
                            .send(Err(WalletError::PanicCaught(crash_id.to_string())))
                            .await;
                        return;
                    }
                };
                match (started, end) {
                    (Err(e), _) => {
                        tracing::warn!(error = %e, "signing party failed to start");
                        let _ = res_tx.send(Err(e)).await;
                    }
                    (Ok(()), None) => {}
                    (Ok(()), Some(end_rx)) => {
                        let result = end_rx.await.map_err(|_| {
                            WalletError::ProtocolAborted(
                                "signing party terminated without a result".into(),
                            )
                        });
                        let _ = res_tx.send(result).await;
                    }
                }
            });
        }
        drop(res_tx);

        match tokio::time::timeout(SIGN_TIMEOUT, res_rx.recv()).await {
            Err(_) => Err(WalletError::SignatureTimeout),
            Ok(None) => Err(WalletError::ProtocolAborted("all signing parties terminated".into())),
            Ok(Some(result)) => result,
        }
    }
}
