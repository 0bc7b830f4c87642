//! Signing party.
//!
//! A quorum of T+1 parties signs a digest. Every member forwards its
//! Lagrange-weighted share contribution point-to-point to the combiner
//! (the lowest-sorted quorum member, deterministic for all parties); the
//! combiner assembles the signing key in a zeroised buffer, applies the
//! HD derivation delta, signs with RFC6979, checks the signature against
//! the (tweaked) joint key and broadcasts the DER bytes. Every party's
//! completion channel then yields the same signature, so the first result
//! the orchestrator sees is authoritative.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{ProjectivePoint, Scalar};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use zeroize::Zeroizing;

use crate::error::WalletError;
use crate::protocol::vss;
use crate::protocol::{Outgoing, OutboundSender, PartyId, PeerContext, SaveData, WireMessage};
use crate::transport::Party;

pub struct SignParty {
    self_id: PartyId,
    ctx: PeerContext,
    digest: Vec<u8>,
    /// HD derivation delta added to the combined key before signing.
    il: Option<Scalar>,
    sdata: SaveData,
    out: OutboundSender,
    state: Mutex<State>,
}

struct State {
    received: HashMap<String, Scalar>,
    end: Option<oneshot::Sender<Vec<u8>>>,
    done: bool,
    started: bool,
}

impl SignParty {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        self_id: PartyId,
        ctx: PeerContext,
        threshold: usize,
        digest: &[u8],
        sdata: SaveData,
        il: Option<Scalar>,
        out: OutboundSender,
        end: oneshot::Sender<Vec<u8>>,
    ) -> Result<Arc<Self>, WalletError> {
        if !ctx.contains(&self_id.id) {
            return Err(WalletError::InvalidConfiguration(format!(
                "party {} is not in the signing quorum",
                self_id.id
            )));
        }
        if ctx.len() < threshold + 1 {
            return Err(WalletError::InvalidConfiguration(format!(
                "signing requires {} shares, got {}",
                threshold + 1,
                ctx.len()
            )));
        }
        if digest.is_empty() {
            return Err(WalletError::InvalidConfiguration("empty digest".into()));
        }
        Ok(Arc::new(Self {
            self_id,
            ctx,
            digest: digest.to_vec(),
            il,
            sdata,
            out,
            state: Mutex::new(State {
                received: HashMap::new(),
                end: Some(end),
                done: false,
                started: false,
            }),
        }))
    }

    fn is_combiner(&self) -> bool {
        self.ctx.first().id == self.self_id.id
    }

    /// This party's additive contribution: its Lagrange-weighted share.
    fn weighted_share(&self) -> Result<Scalar, WalletError> {
        let xs = self.ctx.x_coordinates();
        let i = self
            .ctx
            .position(&self.self_id.id)
            .ok_or_else(|| WalletError::ProtocolAborted("party missing from quorum".into()))?;
        Ok(vss::lagrange_at_zero(&xs, i)? * self.sdata.secret_share()?)
    }

    fn try_finalize(&self, state: &mut State) -> Result<(), WalletError> {
        if state.done || !self.is_combiner() || state.received.len() != self.ctx.len() {
            return Ok(());
        }

        let mut combined = Scalar::ZERO;
        for p in self.ctx.parties() {
            combined += state.received[&p.id];
        }
        state.received.clear();
        let delta = self.il.unwrap_or(Scalar::ZERO);
        let signing_scalar = combined + delta;

        let key_bytes = Zeroizing::new(signing_scalar.to_bytes());
        let signing_key = SigningKey::from_bytes(&key_bytes).map_err(|_| {
            WalletError::ProtocolAborted("combined shares do not form a signing key".into())
        })?;

        // The reassembled key must correspond to the joint public key,
        // tweaked by the derivation delta when one is set.
        let expected_point =
            self.sdata.public_point()? + ProjectivePoint::GENERATOR * delta;
        if expected_point == ProjectivePoint::IDENTITY {
            return Err(WalletError::ProtocolAborted(
                "derived signing key is the point at infinity".into(),
            ));
        }
        let expected =
            VerifyingKey::from_sec1_bytes(expected_point.to_affine().to_encoded_point(true).as_bytes())
                .map_err(|_| WalletError::ProtocolAborted("joint public key invalid".into()))?;
        if signing_key.verifying_key() != &expected {
            return Err(WalletError::ProtocolAborted(
                "signing quorum does not match the wallet public key".into(),
            ));
        }

        let signature: Signature = signing_key
            .sign_prehash(&self.digest)
            .map_err(|e| WalletError::ProtocolAborted(format!("signing failed: {e}")))?;
        let der = signature.to_der().as_bytes().to_vec();

        self.out
            .send(Outgoing::broadcast(
                self.self_id.clone(),
                WireMessage::SignResult { signature: hex::encode(&der) }.encode()?,
            ))
            .map_err(|_| WalletError::ProtocolAborted("outbound channel closed".into()))?;

        state.done = true;
        if let Some(end) = state.end.take() {
            let _ = end.send(der);
        }
        Ok(())
    }
}

#[async_trait]
impl Party for SignParty {
    async fn start(&self) -> Result<(), WalletError> {
        let mut state = self.state.lock();
        if state.started {
            return Err(WalletError::ProtocolAborted("signing party started twice".into()));
        }
        state.started = true;

        let w = self.weighted_share()?;
        if self.is_combiner() {
            state.received.insert(self.self_id.id.clone(), w);
            self.try_finalize(&mut state)
        } else {
            self.out
                .send(Outgoing::unicast(
                    self.self_id.clone(),
                    self.ctx.first().id.clone(),
                    WireMessage::SignShare { share: vss::scalar_to_hex(&w) }.encode()?,
                ))
                .map_err(|_| WalletError::ProtocolAborted("outbound channel closed".into()))
        }
    }

    async fn update(
        &self,
        wire: &[u8],
        from: &PartyId,
        _is_broadcast: bool,
    ) -> Result<bool, WalletError> {
        if !self.ctx.contains(&from.id) || from.id == self.self_id.id {
            tracing::warn!(from = %from.id, "sign: message from outside the quorum");
            return Ok(false);
        }
        let mut state = self.state.lock();
        if state.done {
            return Ok(true);
        }
        match WireMessage::decode(wire)? {
            WireMessage::SignShare { share } => {
                if !self.is_combiner() {
                    tracing::warn!(from = %from.id, "sign: share sent to a non-combiner");
                    return Ok(false);
                }
                state.received.insert(from.id.clone(), vss::scalar_from_hex(&share)?);
                self.try_finalize(&mut state)?;
            }
            WireMessage::SignResult { signature } => {
                let der = hex::decode(&signature).map_err(|_| {
                    WalletError::ProtocolAborted("bad signature encoding".into())
                })?;
                state.done = true;
                if let Some(end) = state.end.take() {
                    let _ = end.send(der);
                }
            }
            other => {
                tracing::warn!(from = %from.id, ?other, "sign: unexpected round");
                return Ok(false);
            }
        }
        Ok(true)
    }
}
