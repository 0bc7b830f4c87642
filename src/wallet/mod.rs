//! The wallet aggregate: a multi-party wallet with threshold signature
//! support, its key shares, and the keygen / sign / reshare / backup
//! operations.
//!
//! A wallet owns a set of [`WalletKey`] shares stamped with the wallet's
//! generation counter. The joint public key and chaincode are fixed at
//! creation; a reshare replaces the share set and bumps the generation,
//! nothing else. Shares are persisted first and the wallet row last, so
//! a torn save never leaves a wallet pointing at a missing share set.

pub mod backup;
mod keygen;
mod reshare;
pub mod share;
mod sign;

pub use share::WalletKey;
pub use sign::SignOptions;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::env::Env;
use crate::error::WalletError;
use crate::events::WalletEvent;
use crate::id::Xid;
use crate::progress::ProgressSink;
use crate::util;

/// The only curve this backend supports.
pub const CURVE_SECP256K1: &str = "secp256k1";

/// Create-API boundary policy. The core itself accepts any party count
/// from one up; user-facing creation demands a real quorum.
pub const MIN_CREATE_KEYS: usize = 3;

/// A multi-signature wallet with threshold signature scheme support.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Wallet {
    pub id: Xid,
    /// User-friendly name.
    pub name: String,
    /// Elliptic curve, always "secp256k1".
    pub curve: String,
    /// Minimum number of shares beyond the first required for signing:
    /// any T+1 shares form a signing quorum.
    pub threshold: usize,
    /// Incremented on reshare; indexes the active share set.
    pub gen: u64,
    /// Base64url, 33-byte compressed joint public key. Never changes
    /// after creation.
    pub pubkey: String,
    /// Base64url, 32 bytes of entropy for HD derivation. Never changes
    /// after creation.
    pub chaincode: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    /// The active shares. Loaded per generation, serialised into
    /// backups, never part of the wallet row itself.
    #[serde(default)]
    pub keys: Vec<WalletKey>,
}

impl Wallet {
    pub fn new(name: &str, threshold: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Xid::new("wlt"),
            name: name.to_string(),
            curve: String::new(),
            threshold,
            gen: 0,
            pubkey: String::new(),
            chaincode: String::new(),
            created: now,
            modified: now,
            keys: Vec::new(),
        }
    }

    /// Persist the wallet and its shares. All shares must report the same
    /// generation, which becomes the wallet's; shares are written first,
    /// the wallet row last.
    pub fn save(&mut self, env: &Env) -> Result<(), WalletError> {
        if self.keys.is_empty() {
            return Err(WalletError::StorePrecondition(
                "cannot save a wallet with no keys".into(),
            ));
        }
        let gen = self.keys[0].gen;
        for (i, key) in self.keys.iter().enumerate() {
            if key.gen != gen {
                return Err(WalletError::StorePrecondition(format!(
                    "inconsistent share generation: key[0].gen={gen} but key[{i}].gen={}",
                    key.gen
                )));
            }
        }
        self.gen = gen;

        for (i, key) in self.keys.iter().enumerate() {
            env.shares
                .upsert(key)
                .map_err(|e| WalletError::Store(format!("failed to save wallet key {i}: {e}")))?;
        }
        env.wallets
            .upsert(self)
            .map_err(|e| WalletError::Store(format!("failed to save wallet {}: {e}", self.id)))?;
        Ok(())
    }

    /// Load a wallet and exactly its active share set, the rows matching
    /// `(wallet, gen)`. A wallet without loadable shares is unusable and
    /// reported as such.
    pub fn by_id(env: &Env, id: &Xid) -> Result<Wallet, WalletError> {
        if id.prefix() != "wlt" {
            return Err(WalletError::InvalidConfiguration(format!(
                "invalid key for wallet: {}",
                id.prefix()
            )));
        }
        let mut wallet = env
            .wallets
            .get(id)?
            .ok_or_else(|| WalletError::NotFound(format!("wallet {id}")))?;
        wallet.keys = env.shares.find(id, wallet.gen)?;
        if wallet.keys.is_empty() {
            return Err(WalletError::StorePrecondition(format!(
                "no shares for wallet {id} at generation {}",
                wallet.gen
            )));
        }
        Ok(wallet)
    }

    /// All wallets with their active shares loaded.
    pub fn all(env: &Env) -> Result<Vec<Wallet>, WalletError> {
        let mut wallets = env.wallets.all()?;
        for wallet in &mut wallets {
            wallet.keys = env.shares.find(&wallet.id, wallet.gen)?;
            if wallet.keys.is_empty() {
                return Err(WalletError::StorePrecondition(format!(
                    "failed to load keys for wallet {}",
                    wallet.id
                )));
            }
        }
        Ok(wallets)
    }

    /// Delete the wallet and every generation of its shares, announcing
    /// the deletion first so collaborators can cascade.
    pub fn delete(&self, env: &Env) -> Result<(), WalletError> {
        env.events.emit(WalletEvent::Deleted(self.id.clone()));
        env.shares
            .delete_for_wallet(&self.id)
            .map_err(|e| WalletError::Store(format!("failed to delete wallet keys: {e}")))?;
        env.wallets
            .delete(&self.id)
            .map_err(|e| WalletError::Store(format!("failed to delete wallet {}: {e}", self.id)))?;
        Ok(())
    }

    /// Update the user-facing name.
    pub fn rename(&mut self, env: &Env, name: &str) -> Result<(), WalletError> {
        self.name = name.to_string();
        self.modified = Utc::now();
        self.save(env)
    }

    /// Find an active share by its id string.
    pub fn get_key(&self, id: &str) -> Option<&WalletKey> {
        self.keys.iter().find(|k| k.id.to_string() == id)
    }

    /// The joint public key.
    pub fn public_key(&self) -> Result<k256::PublicKey, WalletError> {
        let raw = util::b64_decode(&self.pubkey)
            .map_err(|_| WalletError::InvalidConfiguration("bad wallet pubkey encoding".into()))?;
        k256::PublicKey::from_sec1_bytes(&raw)
            .map_err(|_| WalletError::InvalidConfiguration("bad wallet pubkey".into()))
    }

    pub fn chaincode_bytes(&self) -> Result<Vec<u8>, WalletError> {
        util::b64_decode(&self.chaincode)
            .map_err(|_| WalletError::InvalidConfiguration("bad wallet chaincode encoding".into()))
    }
}

/// Create, generate and persist a new wallet. This is the user-facing
/// entry point and enforces the minimum key count policy; the core
/// initializer itself accepts smaller sets.
pub async fn create_wallet(
    env: &Env,
    name: &str,
    threshold: usize,
    keys: &[crate::cipher::KeyDescription],
    progress: &ProgressSink,
) -> Result<Wallet, WalletError> {
    if keys.len() < MIN_CREATE_KEYS {
        return Err(WalletError::InvalidConfiguration(format!(
            "need at least {MIN_CREATE_KEYS} keys, got {}",
            keys.len()
        )));
    }
    let mut wallet = Wallet::new(name, threshold);
    wallet.initialize(env, keys, progress).await?;
    wallet.save(env)?;
    Ok(wallet)
}

/// Map a task join failure onto the crash log.
pub(crate) fn join_failure(env: &Env, context: &str, e: tokio::task::JoinError) -> WalletError {
    let detail = if e.is_panic() {
        crate::crash::panic_detail(e.into_panic().as_ref())
    } else {
        e.to_string()
    };
    let id = env.crash.log(context, &detail);
    WalletError::PanicCaught(id.to_string())
}
