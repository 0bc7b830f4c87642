//! Share encryption at rest.
//!
//! A share's ciphertext is sealed under one of four credential schemes.
//! Password and StoreKey credentials are stretched with
//! PBKDF2-HMAC-SHA256 (4096 rounds) into an ed25519 identity bound to the
//! share id; the SPKI DER of the derived public key is stored next to the
//! ciphertext so `open` can compare it in constant time and fail fast
//! with the right "wrong password" / "wrong store key" error before any
//! decryption is attempted. RemoteKey shares are sealed to the remote
//! fleet's identities instead and opened by a live transport session, not
//! locally.

pub mod envelope;

use std::fmt;

use ed25519_dalek::pkcs8::{DecodePublicKey, EncodePublicKey};
use ed25519_dalek::{SigningKey, VerifyingKey};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::WalletError;
use crate::id::Xid;
use crate::util;

/// PBKDF2 iteration count for credential stretching.
pub const PBKDF2_ROUNDS: u32 = 4096;
/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 6;
/// Raw byte length of a store key secret.
pub const STORE_KEY_LEN: usize = 64;

/// Persisted credential scheme of a share.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialKind {
    Plain,
    Password,
    StoreKey,
    RemoteKey,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CredentialKind::Plain => "Plain",
            CredentialKind::Password => "Password",
            CredentialKind::StoreKey => "StoreKey",
            CredentialKind::RemoteKey => "RemoteKey",
        };
        f.write_str(s)
    }
}

/// Runtime credential material. Secrets are wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub enum Credential {
    /// No encryption; acceptable only when the local store is trusted.
    Plain,
    /// User password, stretched against the share id.
    Password(String),
    /// 64 random bytes, base64url encoded, split into PBKDF2 input and salt.
    StoreKey(String),
    /// Session id of a share held by the remote signing service.
    RemoteKey(String),
}

impl Credential {
    pub fn kind(&self) -> CredentialKind {
        match self {
            Credential::Plain => CredentialKind::Plain,
            Credential::Password(_) => CredentialKind::Password,
            Credential::StoreKey(_) => CredentialKind::StoreKey,
            Credential::RemoteKey(_) => CredentialKind::RemoteKey,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the secret material.
        write!(f, "Credential::{}", self.kind())
    }
}

/// The credential envelope a caller passes to unlock or initially seal a
/// share. `id` points at the target share when several are available.
#[derive(Clone, Debug)]
pub struct KeyDescription {
    pub id: Option<Xid>,
    pub credential: Credential,
}

impl KeyDescription {
    pub fn plain() -> Self {
        Self { id: None, credential: Credential::Plain }
    }

    pub fn password(password: &str) -> Self {
        Self { id: None, credential: Credential::Password(password.to_string()) }
    }

    pub fn store_key(secret: &str) -> Self {
        Self { id: None, credential: Credential::StoreKey(secret.to_string()) }
    }

    pub fn remote(session: &str) -> Self {
        Self { id: None, credential: Credential::RemoteKey(session.to_string()) }
    }

    pub fn with_id(mut self, id: Xid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn kind(&self) -> CredentialKind {
        self.credential.kind()
    }
}

/// Result of sealing a share: the public material for the share's `Key`
/// column and the ciphertext for its `Data` column.
#[derive(Debug)]
pub struct SealedShare {
    pub key: String,
    pub data: Vec<u8>,
}

pub(crate) fn spki_der(vk: &VerifyingKey) -> Result<Vec<u8>, WalletError> {
    vk.to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| WalletError::InvalidConfiguration(format!("public key encoding: {e}")))
}

pub(crate) fn vk_from_spki(der: &[u8]) -> Result<VerifyingKey, WalletError> {
    VerifyingKey::from_public_key_der(der)
        .map_err(|e| WalletError::MalformedCiphertext(format!("bad SPKI public key: {e}")))
}

/// Derive the ed25519 identity for a password bound to a share id.
pub(crate) fn password_to_ed25519(password: &str, salt: &[u8]) -> Result<SigningKey, WalletError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(WalletError::InvalidConfiguration("password is too short".into()));
    }
    let mut seed = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ROUNDS, &mut seed[..]);
    Ok(SigningKey::from_bytes(&seed))
}

/// Derive the ed25519 identity for a base64url store key.
pub(crate) fn store_key_to_ed25519(store_key: &str) -> Result<SigningKey, WalletError> {
    let raw = Zeroizing::new(util::b64_decode(store_key).map_err(|_| {
        WalletError::InvalidConfiguration("storeKey is not valid base64url".into())
    })?);
    if raw.len() != STORE_KEY_LEN {
        return Err(WalletError::InvalidConfiguration(
            "invalid storeKey format (must be 64 bytes long)".into(),
        ));
    }
    let mut seed = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha256>(&raw[..32], &raw[32..], PBKDF2_ROUNDS, &mut seed[..]);
    Ok(SigningKey::from_bytes(&seed))
}

/// Seal a share plaintext under a local credential.
///
/// RemoteKey sealing needs the remote fleet and lives with the share
/// entity; passing one here is a configuration error.
pub fn seal(
    plaintext: &[u8],
    credential: &Credential,
    share_id: &Xid,
) -> Result<SealedShare, WalletError> {
    match credential {
        Credential::Plain => Ok(SealedShare { key: String::new(), data: plaintext.to_vec() }),
        Credential::Password(password) => {
            let sk = password_to_ed25519(password, share_id.bytes())?;
            let vk = sk.verifying_key();
            Ok(SealedShare {
                key: util::b64(&spki_der(&vk)?),
                data: envelope::seal(plaintext, &[vk])?,
            })
        }
        Credential::StoreKey(secret) => {
            let sk = store_key_to_ed25519(secret)?;
            let vk = sk.verifying_key();
            Ok(SealedShare {
                key: util::b64(&spki_der(&vk)?),
                data: envelope::seal(plaintext, &[vk])?,
            })
        }
        Credential::RemoteKey(_) => Err(WalletError::InvalidConfiguration(
            "remote shares are sealed through the remote fleet".into(),
        )),
    }
}

/// Open a share ciphertext with the supplied credential.
///
/// The stored public material is compared in constant time before any
/// decryption; a mismatch yields the distinguishable credential error and
/// nothing else.
pub fn open(
    data: &[u8],
    stored_key: &str,
    credential: &Credential,
    share_id: &Xid,
) -> Result<Vec<u8>, WalletError> {
    match credential {
        Credential::Plain => Ok(data.to_vec()),
        Credential::Password(password) => {
            let sk = password_to_ed25519(password, share_id.bytes())?;
            preflight(stored_key, &sk, WalletError::WrongPassword)?;
            envelope::open(data, &sk)
        }
        Credential::StoreKey(secret) => {
            let sk = store_key_to_ed25519(secret)?;
            preflight(stored_key, &sk, WalletError::WrongStoreKey)?;
            envelope::open(data, &sk)
        }
        Credential::RemoteKey(_) => Err(WalletError::InvalidConfiguration(
            "cannot open keys of type RemoteKey".into(),
        )),
    }
}

fn preflight(stored_key: &str, sk: &SigningKey, mismatch: WalletError) -> Result<(), WalletError> {
    let derived = spki_der(&sk.verifying_key())?;
    let stored = util::b64_decode(stored_key)
        .map_err(|_| WalletError::MalformedCiphertext("bad stored public material".into()))?;
    if bool::from(derived.as_slice().ct_eq(stored.as_slice())) {
        Ok(())
    } else {
        Err(mismatch)
    }
}

/// A freshly created store key, private half plus derived public material.
#[derive(Clone, Serialize)]
pub struct StoreKeyMaterial {
    pub private: String,
    pub public: String,
}

/// Create a new 64 byte store key secret.
pub fn create_store_key() -> Result<StoreKeyMaterial, WalletError> {
    let mut raw = Zeroizing::new([0u8; STORE_KEY_LEN]);
    rand::thread_rng().fill_bytes(&mut raw[..]);
    let private = util::b64(&raw[..]);
    let sk = store_key_to_ed25519(&private)?;
    Ok(StoreKeyMaterial {
        public: util::b64(&spki_der(&sk.verifying_key())?),
        private,
    })
}

/// Derive the public material a (password, share id) pair would produce,
/// so callers can preflight without touching the ciphertext.
pub fn derive_password_public(password: &str, share_id: &Xid) -> Result<String, WalletError> {
    share_id.expect_prefix("wkey")?;
    let sk = password_to_ed25519(password, share_id.bytes())?;
    Ok(util::b64(&spki_der(&sk.verifying_key())?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn share_id() -> Xid {
        Xid::new("wkey")
    }

    #[test]
    fn plain_is_identity() {
        let id = share_id();
        let sealed = seal(b"data", &Credential::Plain, &id).unwrap();
        assert!(sealed.key.is_empty());
        assert_eq!(sealed.data, b"data");
        assert_eq!(open(&sealed.data, "", &Credential::Plain, &id).unwrap(), b"data");
    }

    #[test]
    fn password_roundtrip() {
        let id = share_id();
        let cred = Credential::Password("correct-horse".into());
        let sealed = seal(b"save data", &cred, &id).unwrap();
        assert!(!sealed.key.is_empty());
        assert_eq!(open(&sealed.data, &sealed.key, &cred, &id).unwrap(), b"save data");
    }

    #[test]
    fn wrong_password_is_distinguishable() {
        let id = share_id();
        let sealed = seal(b"p", &Credential::Password("correct-horse".into()), &id).unwrap();
        let err = open(
            &sealed.data,
            &sealed.key,
            &Credential::Password("tr0ub4dor".into()),
            &id,
        )
        .unwrap_err();
        assert!(matches!(err, WalletError::WrongPassword));
        assert_eq!(err.code(), "error_wrong_password");
    }

    #[test]
    fn short_password_is_rejected() {
        let id = share_id();
        let err = seal(b"p", &Credential::Password("five!".into()), &id).unwrap_err();
        assert!(matches!(err, WalletError::InvalidConfiguration(_)));
    }

    #[test]
    fn password_is_bound_to_share_id() {
        let sealed = seal(b"p", &Credential::Password("correct-horse".into()), &share_id()).unwrap();
        // Same password, different share: the derived identity differs.
        let err = open(
            &sealed.data,
            &sealed.key,
            &Credential::Password("correct-horse".into()),
            &share_id(),
        )
        .unwrap_err();
        assert!(matches!(err, WalletError::WrongPassword));
    }

    #[test]
    fn store_key_roundtrip_and_mismatch() {
        let id = share_id();
        let good = create_store_key().unwrap();
        let bad = create_store_key().unwrap();
        let cred = Credential::StoreKey(good.private.clone());
        let sealed = seal(b"sk data", &cred, &id).unwrap();
        assert_eq!(sealed.key, good.public);
        assert_eq!(open(&sealed.data, &sealed.key, &cred, &id).unwrap(), b"sk data");

        let err = open(
            &sealed.data,
            &sealed.key,
            &Credential::StoreKey(bad.private.clone()),
            &id,
        )
        .unwrap_err();
        assert!(matches!(err, WalletError::WrongStoreKey));
        assert_eq!(err.code(), "error_wrong_store_key");
    }

    #[test]
    fn store_key_must_be_64_bytes() {
        let short = util::b64(&[0u8; 32]);
        assert!(matches!(
            store_key_to_ed25519(&short),
            Err(WalletError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn derive_password_public_matches_seal() {
        let id = share_id();
        let sealed = seal(b"p", &Credential::Password("correct-horse".into()), &id).unwrap();
        assert_eq!(derive_password_public("correct-horse", &id).unwrap(), sealed.key);
    }
}
