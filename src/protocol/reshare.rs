//! Resharing party.
//!
//! Rotates a shared key from the old committee to a new one without ever
//! materialising the secret. Every old member spreads its
//! Lagrange-weighted share over a fresh polynomial of the new threshold:
//! commitments are broadcast, evaluations go point-to-point to the new
//! members. The new members additionally run a proactive refresh among
//! themselves with zero-constant polynomials, so the old committee alone
//! does not determine the new shares. Summing everything gives each new
//! member a share of the same secret under the new polynomial; the joint
//! public key is recomputed from the constant-term commitments and must
//! come out unchanged. Old members produce no save-data.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use k256::{ProjectivePoint, Scalar};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::WalletError;
use crate::protocol::vss::{self, Polynomial};
use crate::protocol::{
    Committee, Outgoing, OutboundSender, PartyId, PeerContext, PreParams, SaveData, WireMessage,
};
use crate::transport::Party;

/// Construction parameters for one resharing run, mirroring what the
/// remote side receives in the session init packet.
#[derive(Clone)]
pub struct ReshareParams {
    pub old_ctx: PeerContext,
    pub new_ctx: PeerContext,
    pub self_id: PartyId,
    pub old_threshold: usize,
    pub new_threshold: usize,
    pub committee: Committee,
}

pub struct ReshareParty {
    params: ReshareParams,
    out: OutboundSender,
    state: Mutex<State>,
}

struct State {
    input: Option<SaveData>,
    pre: Option<PreParams>,
    old_commitments: HashMap<String, Vec<ProjectivePoint>>,
    old_shares: HashMap<String, Scalar>,
    new_commitments: HashMap<String, Vec<ProjectivePoint>>,
    new_shares: HashMap<String, Scalar>,
    end: Option<oneshot::Sender<SaveData>>,
    done: bool,
    started: bool,
}

impl ReshareParty {
    /// An old-committee member, feeding its decrypted save-data in.
    pub fn old(
        params: ReshareParams,
        input: SaveData,
        out: OutboundSender,
    ) -> Result<Arc<Self>, WalletError> {
        if params.committee != Committee::Old {
            return Err(WalletError::InvalidConfiguration("expected old committee".into()));
        }
        if !params.old_ctx.contains(&params.self_id.id) {
            return Err(WalletError::InvalidConfiguration(format!(
                "party {} is not in the old committee",
                params.self_id.id
            )));
        }
        Ok(Arc::new(Self {
            params,
            out,
            state: Mutex::new(State {
                input: Some(input),
                pre: None,
                old_commitments: HashMap::new(),
                old_shares: HashMap::new(),
                new_commitments: HashMap::new(),
                new_shares: HashMap::new(),
                end: None,
                done: false,
                started: false,
            }),
        }))
    }

    /// A new-committee member, receiving save-data out.
    pub fn new_member(
        params: ReshareParams,
        pre: PreParams,
        out: OutboundSender,
        end: oneshot::Sender<SaveData>,
    ) -> Result<Arc<Self>, WalletError> {
        if params.committee != Committee::New {
            return Err(WalletError::InvalidConfiguration("expected new committee".into()));
        }
        if !params.new_ctx.contains(&params.self_id.id) {
            return Err(WalletError::InvalidConfiguration(format!(
                "party {} is not in the new committee",
                params.self_id.id
            )));
        }
        if params.new_threshold >= params.new_ctx.len() {
            return Err(WalletError::InvalidConfiguration("threshold too high".into()));
        }
        if pre.threshold() != params.new_threshold {
            return Err(WalletError::InvalidConfiguration(
                "pre-params were generated for a different threshold".into(),
            ));
        }
        Ok(Arc::new(Self {
            params,
            out,
            state: Mutex::new(State {
                input: None,
                pre: Some(pre),
                old_commitments: HashMap::new(),
                old_shares: HashMap::new(),
                new_commitments: HashMap::new(),
                new_shares: HashMap::new(),
                end: Some(end),
                done: false,
                started: false,
            }),
        }))
    }

    fn send(&self, msg: Outgoing) -> Result<(), WalletError> {
        self.out
            .send(msg)
            .map_err(|_| WalletError::ProtocolAborted("outbound channel closed".into()))
    }

    fn start_old(&self, state: &mut State) -> Result<(), WalletError> {
        let input = state
            .input
            .take()
            .ok_or_else(|| WalletError::ProtocolAborted("old committee input missing".into()))?;

        // Lagrange weight over the full old committee.
        let xs = self.params.old_ctx.x_coordinates();
        let i = self
            .params
            .old_ctx
            .position(&self.params.self_id.id)
            .ok_or_else(|| WalletError::ProtocolAborted("party missing from old committee".into()))?;
        let weighted = vss::lagrange_at_zero(&xs, i)? * input.secret_share()?;

        let poly = Polynomial::with_constant(weighted, self.params.new_threshold);
        self.send(Outgoing::broadcast(
            self.params.self_id.clone(),
            WireMessage::ReshareCommitments {
                committee: Committee::Old,
                commitments: vss::points_to_hex(&poly.commitments()),
            }
            .encode()?,
        ))?;
        for peer in self.params.new_ctx.parties() {
            self.send(Outgoing::unicast(
                self.params.self_id.clone(),
                peer.id.clone(),
                WireMessage::ReshareShare {
                    committee: Committee::Old,
                    share: vss::scalar_to_hex(&poly.eval(&peer.x_coordinate())),
                }
                .encode()?,
            ))?;
        }
        // Nothing left to observe locally; the new committee finishes the run.
        state.done = true;
        Ok(())
    }

    fn start_new(&self, state: &mut State) -> Result<(), WalletError> {
        let pre = state
            .pre
            .take()
            .ok_or_else(|| WalletError::ProtocolAborted("new committee pre-params missing".into()))?;
        let refresh = pre.into_refresh_polynomial();
        let commitments = refresh.commitments();

        self.send(Outgoing::broadcast(
            self.params.self_id.clone(),
            WireMessage::ReshareCommitments {
                committee: Committee::New,
                commitments: vss::points_to_hex(&commitments),
            }
            .encode()?,
        ))?;
        for peer in self.params.new_ctx.parties() {
            if peer.id == self.params.self_id.id {
                continue;
            }
            self.send(Outgoing::unicast(
                self.params.self_id.clone(),
                peer.id.clone(),
                WireMessage::ReshareShare {
                    committee: Committee::New,
                    share: vss::scalar_to_hex(&refresh.eval(&peer.x_coordinate())),
                }
                .encode()?,
            ))?;
        }

        let self_id = self.params.self_id.clone();
        let own_eval = refresh.eval(&self_id.x_coordinate());
        state.new_shares.insert(self_id.id.clone(), own_eval);
        state.new_commitments.insert(self_id.id, commitments);
        self.try_finalize(state)
    }

    fn try_finalize(&self, state: &mut State) -> Result<(), WalletError> {
        let old_n = self.params.old_ctx.len();
        let new_n = self.params.new_ctx.len();
        if state.done
            || state.old_commitments.len() != old_n
            || state.old_shares.len() != old_n
            || state.new_commitments.len() != new_n
            || state.new_shares.len() != new_n
        {
            return Ok(());
        }

        let x_self = self.params.self_id.x_coordinate();
        let mut share = Scalar::ZERO;
        let mut public = ProjectivePoint::IDENTITY;
        let mut failure: Option<String> = None;

        for p in self.params.old_ctx.parties() {
            let commitments = &state.old_commitments[&p.id];
            let incoming = state.old_shares[&p.id];
            if !vss::verify_share(commitments, &x_self, &incoming) {
                failure = Some(format!("share from old member {} does not verify", p.id));
                break;
            }
            share += incoming;
            public += commitments[0];
        }
        if failure.is_none() {
            for p in self.params.new_ctx.parties() {
                let commitments = &state.new_commitments[&p.id];
                let incoming = state.new_shares[&p.id];
                if commitments[0] != ProjectivePoint::IDENTITY {
                    failure = Some(format!("refresh from {} shifts the secret", p.id));
                    break;
                }
                if p.id != self.params.self_id.id
                    && !vss::verify_share(commitments, &x_self, &incoming)
                {
                    failure = Some(format!("refresh share from {} does not verify", p.id));
                    break;
                }
                share += incoming;
            }
        }

        if let Some(reason) = failure {
            state.done = true;
            state.end = None;
            return Err(WalletError::ProtocolAborted(reason));
        }

        let sdata = SaveData::new(&share, &public, self.params.new_threshold)?;
        state.done = true;
        if let Some(end) = state.end.take() {
            let _ = end.send(sdata);
        }
        Ok(())
    }
}

#[async_trait]
impl Party for ReshareParty {
    async fn start(&self) -> Result<(), WalletError> {
        let mut state = self.state.lock();
        if state.started {
            return Err(WalletError::ProtocolAborted("reshare party started twice".into()));
        }
        state.started = true;
        match self.params.committee {
            Committee::Old => self.start_old(&mut state),
            Committee::New => self.start_new(&mut state),
        }
    }

    async fn update(
        &self,
        wire: &[u8],
        from: &PartyId,
        _is_broadcast: bool,
    ) -> Result<bool, WalletError> {
        if self.params.committee == Committee::Old {
            // Old members only emit; inbound traffic is for the new set.
            return Ok(true);
        }
        let mut state = self.state.lock();
        if state.done {
            return Ok(true);
        }
        match WireMessage::decode(wire)? {
            WireMessage::ReshareCommitments { committee, commitments } => {
                let expected = self.params.new_threshold + 1;
                if commitments.len() != expected {
                    return Err(WalletError::ProtocolAborted(format!(
                        "bad commitment count from {}",
                        from.id
                    )));
                }
                let points = vss::points_from_hex(&commitments)?;
                match committee {
                    Committee::Old if self.params.old_ctx.contains(&from.id) => {
                        state.old_commitments.insert(from.id.clone(), points);
                    }
                    Committee::New if self.params.new_ctx.contains(&from.id) => {
                        state.new_commitments.insert(from.id.clone(), points);
                    }
                    _ => {
                        tracing::warn!(from = %from.id, "reshare: commitments from unknown party");
                        return Ok(false);
                    }
                }
            }
            WireMessage::ReshareShare { committee, share } => {
                let value = vss::scalar_from_hex(&share)?;
                match committee {
                    Committee::Old if self.params.old_ctx.contains(&from.id) => {
                        state.old_shares.insert(from.id.clone(), value);
                    }
                    Committee::New if self.params.new_ctx.contains(&from.id) => {
                        state.new_shares.insert(from.id.clone(), value);
                    }
                    _ => {
                        tracing::warn!(from = %from.id, "reshare: share from unknown party");
                        return Ok(false);
                    }
                }
            }
            other => {
                tracing::warn!(from = %from.id, ?other, "reshare: unexpected round");
                return Ok(false);
            }
        }
        self.try_finalize(&mut state)?;
        Ok(true)
    }
}
