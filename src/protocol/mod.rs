//! The threshold-ECDSA engine.
//!
//! Each share is represented by a party: a state machine that is fed
//! incoming wire messages and emits outgoing ones tagged with a routing
//! record. Parties are keyed by their share id; the 16 id bytes double as
//! the party's big-integer key and Shamir x-coordinate. The orchestrators
//! in [`crate::wallet`] wire parties to the router and the relay
//! transport; this module only knows about messages.
//!
//! Sub-protocols:
//! - [`keygen`]: joint-Feldman distributed key generation,
//! - [`reshare`]: old-committee spread plus new-committee proactive
//!   refresh, preserving the joint public key,
//! - [`sign`]: quorum signing with the HD derivation delta applied to the
//!   combined key, never to any share at rest.

pub mod keygen;
pub mod reshare;
pub mod sign;
pub(crate) mod vss;

use std::cmp::Ordering;

use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::elliptic_curve::Field;
use k256::elliptic_curve::PrimeField;
use k256::{FieldBytes, ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use zeroize::Zeroize;

use crate::error::WalletError;
use crate::id::Xid;

/// A protocol participant: the share id string plus the 16 id bytes used
/// as the party's sort key and Shamir x-coordinate.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartyId {
    pub id: String,
    #[serde(with = "crate::util::hex_key")]
    pub key: [u8; 16],
}

impl PartyId {
    pub fn from_share_id(id: &Xid) -> Self {
        Self { id: id.to_string(), key: *id.bytes() }
    }

    /// The party's x-coordinate on the sharing polynomial. Always below
    /// the curve order; a zero key is rejected by [`PeerContext::new`].
    pub fn x_coordinate(&self) -> Scalar {
        let mut wide = [0u8; 32];
        wide[16..].copy_from_slice(&self.key);
        Option::<Scalar>::from(Scalar::from_repr(FieldBytes::from(wide))).unwrap_or(Scalar::ZERO)
    }
}

impl Ord for PartyId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key).then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for PartyId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The canonically sorted set of participants of one protocol run.
#[derive(Clone, Debug)]
pub struct PeerContext {
    parties: Vec<PartyId>,
}

impl PeerContext {
    pub fn new(mut parties: Vec<PartyId>) -> Result<Self, WalletError> {
        if parties.is_empty() {
            return Err(WalletError::InvalidConfiguration(
                "peer context requires at least one party".into(),
            ));
        }
        parties.sort();
        for pair in parties.windows(2) {
            if pair[0].key == pair[1].key {
                return Err(WalletError::InvalidConfiguration(format!(
                    "duplicate party key for {}",
                    pair[1].id
                )));
            }
        }
        for p in &parties {
            if p.x_coordinate() == Scalar::ZERO {
                return Err(WalletError::InvalidConfiguration(format!(
                    "party {} has a zero key",
                    p.id
                )));
            }
        }
        Ok(Self { parties })
    }

    pub fn parties(&self) -> &[PartyId] {
        &self.parties
    }

    pub fn len(&self) -> usize {
        self.parties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parties.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.parties.iter().any(|p| p.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.parties.iter().position(|p| p.id == id)
    }

    /// The lowest-sorted party. Deterministic across all participants.
    pub fn first(&self) -> &PartyId {
        &self.parties[0]
    }

    /// The x-coordinates of all parties, in context order.
    pub(crate) fn x_coordinates(&self) -> Vec<Scalar> {
        self.parties.iter().map(|p| p.x_coordinate()).collect()
    }
}

/// Pre-generated per-party protocol material: the coefficients of the
/// party's sharing polynomial. Expensive relative to the rest of the
/// protocol, generated ahead of time, disposable afterwards.
#[derive(Clone)]
pub struct PreParams {
    coeffs: Vec<Scalar>,
}

impl PreParams {
    /// Generate material for a run with the given threshold.
    pub fn generate(threshold: usize) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            coeffs: (0..=threshold).map(|_| Scalar::random(&mut rng)).collect(),
        }
    }

    pub fn threshold(&self) -> usize {
        self.coeffs.len().saturating_sub(1)
    }

    pub(crate) fn into_polynomial(self) -> vss::Polynomial {
        vss::Polynomial::new(self.coeffs)
    }

    /// Same coefficients with the constant term forced to zero; used by
    /// the new committee's proactive refresh during reshare.
    pub(crate) fn into_refresh_polynomial(mut self) -> vss::Polynomial {
        self.coeffs[0] = Scalar::ZERO;
        vss::Polynomial::new(self.coeffs)
    }
}

/// A party's terminal state after keygen or reshare: its secret share,
/// the joint public key and the sharing threshold. This is what gets
/// sealed at rest; the share field is wiped on drop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SaveData {
    /// Hex, 32-byte secret scalar.
    pub share: String,
    /// Hex, 33-byte compressed joint public key.
    pub public_key: String,
    pub threshold: usize,
}

impl SaveData {
    pub(crate) fn new(
        share: &Scalar,
        public: &ProjectivePoint,
        threshold: usize,
    ) -> Result<Self, WalletError> {
        if *public == ProjectivePoint::IDENTITY {
            return Err(WalletError::ProtocolAborted(
                "joint public key is the point at infinity".into(),
            ));
        }
        Ok(Self {
            share: hex::encode(share.to_bytes()),
            public_key: hex::encode(public.to_affine().to_encoded_point(true).as_bytes()),
            threshold,
        })
    }

    pub fn secret_share(&self) -> Result<Scalar, WalletError> {
        vss::scalar_from_hex(&self.share)
    }

    pub fn public_point(&self) -> Result<ProjectivePoint, WalletError> {
        vss::point_from_hex(&self.public_key)
    }

    /// The 33-byte compressed joint public key.
    pub fn public_key_bytes(&self) -> Result<Vec<u8>, WalletError> {
        hex::decode(&self.public_key)
            .map_err(|_| WalletError::MalformedCiphertext("bad public key in save data".into()))
    }

    pub fn to_json(&self) -> Result<Vec<u8>, WalletError> {
        serde_json::to_vec(self)
            .map_err(|e| WalletError::ProtocolAborted(format!("save data encode: {e}")))
    }

    pub fn from_json(data: &[u8]) -> Result<Self, WalletError> {
        serde_json::from_slice(data)
            .map_err(|e| WalletError::MalformedCiphertext(format!("save data decode: {e}")))
    }
}

impl Drop for SaveData {
    fn drop(&mut self) {
        self.share.zeroize();
    }
}

/// Which committee a reshare message belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Committee {
    Old,
    New,
}

/// Everything that crosses the wire between parties. Scalars and points
/// travel as hex strings inside a JSON body.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "round", rename_all = "snake_case")]
pub enum WireMessage {
    KeygenCommitments { commitments: Vec<String> },
    KeygenShare { share: String },
    ReshareCommitments { committee: Committee, commitments: Vec<String> },
    ReshareShare { committee: Committee, share: String },
    SignShare { share: String },
    SignResult { signature: String },
}

impl WireMessage {
    pub fn encode(&self) -> Result<Vec<u8>, WalletError> {
        serde_json::to_vec(self)
            .map_err(|e| WalletError::ProtocolAborted(format!("wire encode: {e}")))
    }

    pub fn decode(data: &[u8]) -> Result<Self, WalletError> {
        serde_json::from_slice(data)
            .map_err(|e| WalletError::ProtocolAborted(format!("wire decode: {e}")))
    }
}

/// An outbound message plus its routing record. `to = None` means
/// broadcast to every other participant.
#[derive(Clone, Debug)]
pub struct Outgoing {
    pub from: PartyId,
    pub to: Option<Vec<String>>,
    pub is_broadcast: bool,
    pub body: Vec<u8>,
}

impl Outgoing {
    pub fn broadcast(from: PartyId, body: Vec<u8>) -> Self {
        Self { from, to: None, is_broadcast: true, body }
    }

    pub fn unicast(from: PartyId, to: String, body: Vec<u8>) -> Self {
        Self { from, to: Some(vec![to]), is_broadcast: false, body }
    }
}

/// Channel the parties of one protocol run share for outbound messages.
pub type OutboundSender = mpsc::UnboundedSender<Outgoing>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn party_ids_sort_by_key() {
        let a = PartyId { id: "b".into(), key: [1; 16] };
        let b = PartyId { id: "a".into(), key: [2; 16] };
        let ctx = PeerContext::new(vec![b.clone(), a.clone()]).unwrap();
        assert_eq!(ctx.first(), &a);
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let a = PartyId { id: "a".into(), key: [1; 16] };
        let b = PartyId { id: "b".into(), key: [1; 16] };
        assert!(PeerContext::new(vec![a, b]).is_err());
    }

    #[test]
    fn zero_keys_are_rejected() {
        let z = PartyId { id: "z".into(), key: [0; 16] };
        assert!(PeerContext::new(vec![z]).is_err());
    }

    #[test]
    fn save_data_share_roundtrips() {
        let mut rng = rand::thread_rng();
        let secret = Scalar::random(&mut rng);
        let public = ProjectivePoint::GENERATOR * secret;
        let sdata = SaveData::new(&secret, &public, 1).unwrap();
        assert_eq!(sdata.secret_share().unwrap(), secret);
        assert_eq!(sdata.public_point().unwrap(), public);
        let back = SaveData::from_json(&sdata.to_json().unwrap()).unwrap();
        assert_eq!(back.secret_share().unwrap(), secret);
    }

    #[test]
    fn wire_messages_roundtrip() {
        let msg = WireMessage::ReshareShare { committee: Committee::Old, share: "ab".into() };
        let decoded = WireMessage::decode(&msg.encode().unwrap()).unwrap();
        match decoded {
            WireMessage::ReshareShare { committee, share } => {
                assert_eq!(committee, Committee::Old);
                assert_eq!(share, "ab");
            }
            _ => panic!("wrong round"),
        }
    }

    #[test]
    fn party_id_serde_uses_hex_key() {
        let p = PartyId { id: "wkey-x".into(), key: [0xab; 16] };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["key"], serde_json::json!("ab".repeat(16)));
        let back: PartyId = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }
}
