//! BIP32 non-hardened derivation on the joint public key.
//!
//! Signing parties only ever hold share data, so child keys are derived
//! on the public side: each step HMAC-SHA512s the serialised parent key
//! and index under the chaincode, the left half becomes the step offset
//! IL and the right half the next chaincode. The cumulative IL (sum of
//! the per-step offsets mod n) is what the signer later adds to the
//! shared key, which is how a child key signs without the root private
//! key ever existing.

use hmac::{Hmac, Mac};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::elliptic_curve::PrimeField;
use k256::{FieldBytes, ProjectivePoint, PublicKey, Scalar};
use sha2::Sha512;

use crate::error::WalletError;

type HmacSha512 = Hmac<Sha512>;

/// Expected chaincode length in bytes.
pub const CHAINCODE_LEN: usize = 32;

/// Derive `(cumulative IL, child public key)` for a path of the form
/// `m/a/b/c`. Only non-hardened segments (< 2³¹) are supported.
pub fn derive_public_key(
    parent: &PublicKey,
    chaincode: &[u8],
    path: &str,
) -> Result<(Scalar, PublicKey), WalletError> {
    if chaincode.len() != CHAINCODE_LEN {
        return Err(WalletError::InvalidConfiguration(format!(
            "chaincode must be {CHAINCODE_LEN} bytes, got {}",
            chaincode.len()
        )));
    }
    let indices = parse_path(path)?;

    let mut point = parent.to_projective();
    let mut cc = [0u8; CHAINCODE_LEN];
    cc.copy_from_slice(chaincode);
    let mut cumulative = Scalar::ZERO;

    for index in indices {
        let compressed = point.to_affine().to_encoded_point(true);

        let mut mac = HmacSha512::new_from_slice(&cc)
            .map_err(|e| WalletError::InvalidConfiguration(format!("hmac init: {e}")))?;
        mac.update(compressed.as_bytes());
        mac.update(&index.to_be_bytes());
        let digest = mac.finalize().into_bytes();
        let (left, right) = digest.split_at(32);

        let il_bytes: [u8; 32] = left.try_into().expect("split is 32 bytes");
        let il = Option::<Scalar>::from(Scalar::from_repr(FieldBytes::from(il_bytes)))
            .ok_or_else(|| {
                WalletError::InvalidConfiguration(format!(
                    "derivation step {index} produced an out-of-range offset"
                ))
            })?;

        let child = point + ProjectivePoint::GENERATOR * il;
        if child == ProjectivePoint::IDENTITY {
            return Err(WalletError::InvalidConfiguration(format!(
                "derivation step {index} produced the point at infinity"
            )));
        }

        cumulative += il;
        point = child;
        cc.copy_from_slice(right);
    }

    let child = PublicKey::from_affine(point.to_affine())
        .map_err(|e| WalletError::InvalidConfiguration(format!("derived key invalid: {e}")))?;
    Ok((cumulative, child))
}

/// Apply a cumulative IL to a public key: `parent + IL·G`.
pub fn tweak_public_key(parent: &PublicKey, il: &Scalar) -> Result<PublicKey, WalletError> {
    let point = parent.to_projective() + ProjectivePoint::GENERATOR * *il;
    PublicKey::from_affine(point.to_affine())
        .map_err(|_| WalletError::InvalidConfiguration("tweaked key is the point at infinity".into()))
}

fn parse_path(path: &str) -> Result<Vec<u32>, WalletError> {
    let mut segments = path.split('/');
    if segments.next() != Some("m") {
        return Err(WalletError::InvalidConfiguration("path must start with m/".into()));
    }
    let rest: Vec<&str> = segments.collect();
    if rest.is_empty() {
        return Err(WalletError::InvalidConfiguration(
            "path cannot be empty, must have at least a derivation".into(),
        ));
    }
    rest.iter()
        .map(|seg| {
            let v: u32 = seg.parse().map_err(|_| {
                WalletError::InvalidConfiguration(format!("bad path segment: {seg}"))
            })?;
            if v >= 0x8000_0000 {
                return Err(WalletError::InvalidConfiguration(
                    "hardened keys not supported in here".into(),
                ));
            }
            Ok(v)
        })
        .collect()
}
