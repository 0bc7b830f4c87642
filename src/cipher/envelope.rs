//! Versioned hybrid envelope binding a symmetric content key to one or
//! more ed25519 recipients.
//!
//! Each recipient entry wraps the AES-256-GCM content key under a key
//! agreed via X25519 between an ephemeral key and the recipient's ed25519
//! key mapped to its Montgomery form (the libsodium sealed-box shape).
//! The format is versioned JSON with hex fields; the bytes are opaque to
//! everything but this module.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use curve25519_dalek::constants::X25519_BASEPOINT;
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroizing;

use crate::error::WalletError;

const VERSION: u8 = 1;
const FINGERPRINT_LEN: usize = 8;

#[derive(Serialize, Deserialize)]
struct Recipient {
    /// Truncated SHA-256 of the recipient's SPKI DER, to find the right
    /// entry without trial decryption.
    fp: String,
    /// Ephemeral X25519 public key.
    epk: String,
    nonce: String,
    /// Content key wrapped under the agreed key.
    wrap: String,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    v: u8,
    recipients: Vec<Recipient>,
    nonce: String,
    ct: String,
}

/// The X25519 secret scalar of an ed25519 signing key: clamped low half
/// of SHA-512(seed), as libsodium's sign-to-box conversion computes it.
fn dh_scalar(sk: &SigningKey) -> Scalar {
    let h = Sha512::digest(sk.to_bytes());
    let mut lo = Zeroizing::new([0u8; 32]);
    lo.copy_from_slice(&h[..32]);
    lo[0] &= 248;
    lo[31] &= 127;
    lo[31] |= 64;
    Scalar::from_bytes_mod_order(*lo)
}

fn fingerprint(vk: &VerifyingKey) -> Result<String, WalletError> {
    let der = super::spki_der(vk)?;
    Ok(hex::encode(&Sha256::digest(&der)[..FINGERPRINT_LEN]))
}

fn kek(shared: &MontgomeryPoint, epk: &MontgomeryPoint, pk: &MontgomeryPoint) -> Zeroizing<[u8; 32]> {
    let mut h = Sha256::new();
    h.update(shared.as_bytes());
    h.update(epk.as_bytes());
    h.update(pk.as_bytes());
    Zeroizing::new(h.finalize().into())
}

fn aes_encrypt(key: &[u8; 32], nonce: &[u8; 12], plaintext: &[u8]) -> Result<Vec<u8>, WalletError> {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key))
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| WalletError::MalformedCiphertext("content encryption failed".into()))
}

fn aes_decrypt(key: &[u8; 32], nonce: &[u8; 12], ciphertext: &[u8]) -> Result<Vec<u8>, WalletError> {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key))
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| WalletError::MalformedCiphertext("decryption failed".into()))
}

/// Seal `plaintext` for every key in `recipients`.
pub fn seal(plaintext: &[u8], recipients: &[VerifyingKey]) -> Result<Vec<u8>, WalletError> {
    if recipients.is_empty() {
        return Err(WalletError::InvalidConfiguration(
            "envelope requires at least one recipient".into(),
        ));
    }
    let mut rng = rand::thread_rng();

    let mut content_key = Zeroizing::new([0u8; 32]);
    rng.fill_bytes(&mut *content_key);
    let mut nonce = [0u8; 12];
    rng.fill_bytes(&mut nonce);
    let ct = aes_encrypt(&content_key, &nonce, plaintext)?;

    let mut entries = Vec::with_capacity(recipients.len());
    for vk in recipients {
        let mut eph_seed = Zeroizing::new([0u8; 32]);
        rng.fill_bytes(&mut *eph_seed);
        let eph = SigningKey::from_bytes(&eph_seed);
        let e = dh_scalar(&eph);

        let pk_mont = vk.to_montgomery();
        let epk = X25519_BASEPOINT * e;
        let shared = pk_mont * e;
        let wrap_key = kek(&shared, &epk, &pk_mont);

        let mut wrap_nonce = [0u8; 12];
        rng.fill_bytes(&mut wrap_nonce);
        let wrap = aes_encrypt(&wrap_key, &wrap_nonce, &*content_key)?;

        entries.push(Recipient {
            fp: fingerprint(vk)?,
            epk: hex::encode(epk.as_bytes()),
            nonce: hex::encode(wrap_nonce),
            wrap: hex::encode(wrap),
        });
    }

    let envelope = Envelope {
        v: VERSION,
        recipients: entries,
        nonce: hex::encode(nonce),
        ct: hex::encode(ct),
    };
    serde_json::to_vec(&envelope)
        .map_err(|e| WalletError::MalformedCiphertext(format!("envelope encode: {e}")))
}

/// Open an envelope with the recipient key `sk`.
pub fn open(data: &[u8], sk: &SigningKey) -> Result<Vec<u8>, WalletError> {
    let envelope: Envelope = serde_json::from_slice(data)
        .map_err(|e| WalletError::MalformedCiphertext(format!("envelope decode: {e}")))?;
    if envelope.v != VERSION {
        return Err(WalletError::MalformedCiphertext(format!(
            "unsupported envelope version {}",
            envelope.v
        )));
    }

    let own_fp = fingerprint(&sk.verifying_key())?;
    let scalar = dh_scalar(sk);
    let pk_mont = sk.verifying_key().to_montgomery();

    let nonce: [u8; 12] = decode_fixed(&envelope.nonce)?;
    let ct = hex::decode(&envelope.ct)
        .map_err(|_| WalletError::MalformedCiphertext("bad ciphertext hex".into()))?;

    // Prefer the entry addressed to us; fall back to trying them all so a
    // truncated fingerprint collision cannot lock the share.
    let mut ordered: Vec<&Recipient> = envelope.recipients.iter().filter(|r| r.fp == own_fp).collect();
    ordered.extend(envelope.recipients.iter().filter(|r| r.fp != own_fp));

    for entry in ordered {
        let epk_bytes: [u8; 32] = match decode_fixed(&entry.epk) {
            Ok(b) => b,
            Err(_) => continue,
        };
        let wrap_nonce: [u8; 12] = match decode_fixed(&entry.nonce) {
            Ok(b) => b,
            Err(_) => continue,
        };
        let wrap = match hex::decode(&entry.wrap) {
            Ok(b) => b,
            Err(_) => continue,
        };

        let epk = MontgomeryPoint(epk_bytes);
        let shared = epk * scalar;
        let wrap_key = kek(&shared, &epk, &pk_mont);
        let raw_key = match aes_decrypt(&wrap_key, &wrap_nonce, &wrap) {
            Ok(k) => Zeroizing::new(k),
            Err(_) => continue,
        };
        let content_key: [u8; 32] = match raw_key.as_slice().try_into() {
            Ok(k) => k,
            Err(_) => continue,
        };
        let content_key = Zeroizing::new(content_key);
        if let Ok(plaintext) = aes_decrypt(&content_key, &nonce, &ct) {
            return Ok(plaintext);
        }
    }

    Err(WalletError::MalformedCiphertext(
        "no recipient entry matches this credential".into(),
    ))
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], WalletError> {
    let raw = hex::decode(s).map_err(|_| WalletError::MalformedCiphertext("bad hex field".into()))?;
    raw.try_into()
        .map_err(|_| WalletError::MalformedCiphertext("bad field length".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    #[test]
    fn seal_open_roundtrip() {
        let sk = keypair(7);
        let sealed = seal(b"share data", &[sk.verifying_key()]).unwrap();
        assert_eq!(open(&sealed, &sk).unwrap(), b"share data");
    }

    #[test]
    fn any_recipient_of_a_union_can_open() {
        let a = keypair(1);
        let b = keypair(2);
        let sealed = seal(b"fleet share", &[a.verifying_key(), b.verifying_key()]).unwrap();
        assert_eq!(open(&sealed, &a).unwrap(), b"fleet share");
        assert_eq!(open(&sealed, &b).unwrap(), b"fleet share");
    }

    #[test]
    fn wrong_key_cannot_open() {
        let sk = keypair(3);
        let other = keypair(4);
        let sealed = seal(b"secret", &[sk.verifying_key()]).unwrap();
        assert!(matches!(
            open(&sealed, &other),
            Err(WalletError::MalformedCiphertext(_))
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let sk = keypair(5);
        let sealed = seal(b"secret", &[sk.verifying_key()]).unwrap();
        let mut envelope: serde_json::Value = serde_json::from_slice(&sealed).unwrap();
        let ct = envelope["ct"].as_str().unwrap().to_string();
        let flipped = if ct.starts_with('0') { "1" } else { "0" };
        envelope["ct"] = serde_json::Value::String(format!("{flipped}{}", &ct[1..]));
        let tampered = serde_json::to_vec(&envelope).unwrap();
        assert!(open(&tampered, &sk).is_err());
    }

    #[test]
    fn garbage_is_malformed_not_a_panic() {
        let sk = keypair(6);
        assert!(matches!(
            open(b"not an envelope", &sk),
            Err(WalletError::MalformedCiphertext(_))
        ));
    }
}
