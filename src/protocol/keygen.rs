//! Distributed key generation party.
//!
//! Joint-Feldman over secp256k1: round one broadcasts the Feldman
//! commitments of each party's polynomial, round two sends every other
//! party its evaluation point-to-point. Once a party holds commitments
//! and a verified share from everyone, its secret share is the sum of
//! evaluations and the joint public key is the sum of the constant-term
//! commitments. The terminal save-data is pushed on the party's
//! completion channel; the protocol has no leader.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use k256::{ProjectivePoint, Scalar};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::WalletError;
use crate::protocol::vss::{self, Polynomial};
use crate::protocol::{Outgoing, OutboundSender, PartyId, PeerContext, PreParams, SaveData, WireMessage};
use crate::transport::Party;

pub struct KeygenParty {
    self_id: PartyId,
    ctx: PeerContext,
    threshold: usize,
    out: OutboundSender,
    state: Mutex<State>,
}

struct State {
    poly: Option<Polynomial>,
    commitments: HashMap<String, Vec<ProjectivePoint>>,
    shares: HashMap<String, Scalar>,
    end: Option<oneshot::Sender<SaveData>>,
    done: bool,
}

impl KeygenParty {
    pub fn new(
        self_id: PartyId,
        ctx: PeerContext,
        threshold: usize,
        pre: PreParams,
        out: OutboundSender,
        end: oneshot::Sender<SaveData>,
    ) -> Result<Arc<Self>, WalletError> {
        if !ctx.contains(&self_id.id) {
            return Err(WalletError::InvalidConfiguration(format!(
                "party {} is not in its own peer context",
                self_id.id
            )));
        }
        if threshold >= ctx.len() {
            return Err(WalletError::InvalidConfiguration("threshold too high".into()));
        }
        if pre.threshold() != threshold {
            return Err(WalletError::InvalidConfiguration(
                "pre-params were generated for a different threshold".into(),
            ));
        }
        Ok(Arc::new(Self {
            self_id,
            ctx,
            threshold,
            out,
            state: Mutex::new(State {
                poly: Some(pre.into_polynomial()),
                commitments: HashMap::new(),
                shares: HashMap::new(),
                end: Some(end),
                done: false,
            }),
        }))
    }

    fn send(&self, msg: Outgoing) -> Result<(), WalletError> {
        self.out
            .send(msg)
            .map_err(|_| WalletError::ProtocolAborted("outbound channel closed".into()))
    }

    fn try_finalize(&self, state: &mut State) -> Result<(), WalletError> {
        if state.done
            || state.commitments.len() != self.ctx.len()
            || state.shares.len() != self.ctx.len()
        {
            return Ok(());
        }

        let x_self = self.self_id.x_coordinate();
        let mut secret = Scalar::ZERO;
        let mut public = ProjectivePoint::IDENTITY;
        let mut bad_sender = None;
        for p in self.ctx.parties() {
            let commitments = &state.commitments[&p.id];
            let share = state.shares[&p.id];
            if p.id != self.self_id.id && !vss::verify_share(commitments, &x_self, &share) {
                bad_sender = Some(p.id.clone());
                break;
            }
            secret += share;
            public += commitments[0];
        }
        if let Some(id) = bad_sender {
            state.done = true;
            state.end = None; // wake the orchestrator with a closed channel
            return Err(WalletError::ProtocolAborted(format!(
                "share from {id} does not match its commitments"
            )));
        }

        let sdata = SaveData::new(&secret, &public, self.threshold)?;
        state.done = true;
        if let Some(end) = state.end.take() {
            let _ = end.send(sdata);
        }
        Ok(())
    }
}

#[async_trait]
impl Party for KeygenParty {
    async fn start(&self) -> Result<(), WalletError> {
        let mut state = self.state.lock();
        let poly = state
            .poly
            .take()
            .ok_or_else(|| WalletError::ProtocolAborted("keygen party started twice".into()))?;

        let commitments = poly.commitments();
        self.send(Outgoing::broadcast(
            self.self_id.clone(),
            WireMessage::KeygenCommitments { commitments: vss::points_to_hex(&commitments) }
                .encode()?,
        ))?;

        for peer in self.ctx.parties() {
            if peer.id == self.self_id.id {
                continue;
            }
            let share = poly.eval(&peer.x_coordinate());
            self.send(Outgoing::unicast(
                self.self_id.clone(),
                peer.id.clone(),
                WireMessage::KeygenShare { share: vss::scalar_to_hex(&share) }.encode()?,
            ))?;
        }

        state.shares.insert(self.self_id.id.clone(), poly.eval(&self.self_id.x_coordinate()));
        state.commitments.insert(self.self_id.id.clone(), commitments);
        self.try_finalize(&mut state)
    }

    async fn update(
        &self,
        wire: &[u8],
        from: &PartyId,
        _is_broadcast: bool,
    ) -> Result<bool, WalletError> {
        if !self.ctx.contains(&from.id) || from.id == self.self_id.id {
            tracing::warn!(from = %from.id, "keygen: message from unknown party");
            return Ok(false);
        }
        let mut state = self.state.lock();
        if state.done {
            return Ok(true);
        }
        match WireMessage::decode(wire)? {
            WireMessage::KeygenCommitments { commitments } => {
                if commitments.len() != self.threshold + 1 {
                    return Err(WalletError::ProtocolAborted(format!(
                        "bad commitment count from {}",
                        from.id
                    )));
                }
                state
                    .commitments
                    .insert(from.id.clone(), vss::points_from_hex(&commitments)?);
            }
            WireMessage::KeygenShare { share } => {
                state.shares.insert(from.id.clone(), vss::scalar_from_hex(&share)?);
            }
            other => {
                tracing::warn!(from = %from.id, ?other, "keygen: unexpected round");
                return Ok(false);
            }
        }
        self.try_finalize(&mut state)?;
        Ok(true)
    }
}
