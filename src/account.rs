//! Accounts: chain-facing children of a wallet.
//!
//! An account memoises the outcome of deriving its path on the wallet's
//! joint public key: the child key and the cumulative IL offset. When
//! the account signs, it forwards that IL into the wallet sign path so
//! the quorum signs for the child key directly. Accounts reference their
//! wallet by id only.

use chrono::{DateTime, Utc};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::Scalar;
use serde::{Deserialize, Serialize};

use crate::cipher::KeyDescription;
use crate::env::Env;
use crate::error::WalletError;
use crate::events::WalletEvent;
use crate::hd;
use crate::id::Xid;
use crate::protocol::vss;
use crate::util;
use crate::wallet::{SignOptions, Wallet};

/// A blockchain account derived from a wallet's public key.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Account {
    pub id: Xid,
    /// Parent wallet id.
    pub wallet: Xid,
    pub name: String,
    /// Account index, starts at zero.
    pub index: u32,
    /// Derivation path, non-hardened only.
    pub path: String,
    /// Base64url compressed child public key.
    pub pubkey: String,
    /// Copy of the wallet chaincode used for the derivation.
    pub chaincode: String,
    /// Hex, the memoised cumulative derivation offset.
    #[serde(rename = "IL")]
    pub il: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Account {
    /// Derive and persist a new account at the given index.
    pub fn create(
        env: &Env,
        wallet: &Wallet,
        name: &str,
        index: u32,
    ) -> Result<Account, WalletError> {
        let now = Utc::now();
        let mut account = Account {
            id: Xid::new("acct"),
            wallet: wallet.id.clone(),
            name: name.to_string(),
            index,
            path: String::new(),
            pubkey: String::new(),
            chaincode: String::new(),
            il: String::new(),
            created: now,
            updated: now,
        };
        account.refresh(wallet)?;
        env.accounts.upsert(&account)?;
        Ok(account)
    }

    /// Re-derive the memoised IL and child key from the wallet.
    pub fn refresh(&mut self, wallet: &Wallet) -> Result<(), WalletError> {
        self.path = format!("m/44/60/0/{}", self.index);
        self.chaincode = wallet.chaincode.clone();

        let parent = wallet.public_key()?;
        let chaincode = wallet.chaincode_bytes()?;
        let (il, child) = hd::derive_public_key(&parent, &chaincode, &self.path)?;

        self.il = hex::encode(il.to_bytes());
        self.pubkey = util::b64(child.to_encoded_point(true).as_bytes());
        self.updated = Utc::now();
        Ok(())
    }

    /// The memoised derivation offset as a scalar.
    pub fn il_scalar(&self) -> Result<Scalar, WalletError> {
        vss::scalar_from_hex(&self.il)
    }

    pub fn public_key(&self) -> Result<k256::PublicKey, WalletError> {
        let raw = util::b64_decode(&self.pubkey)
            .map_err(|_| WalletError::InvalidConfiguration("bad account pubkey encoding".into()))?;
        k256::PublicKey::from_sec1_bytes(&raw)
            .map_err(|_| WalletError::InvalidConfiguration("bad account pubkey".into()))
    }

    /// Derive a further child below this account's key.
    pub fn derive_public(&self, subpath: &str) -> Result<k256::PublicKey, WalletError> {
        if self.chaincode.is_empty() {
            return Err(WalletError::InvalidConfiguration("need chaincode".into()));
        }
        let chaincode = util::b64_decode(&self.chaincode)
            .map_err(|_| WalletError::InvalidConfiguration("bad chaincode encoding".into()))?;
        let (_, child) = hd::derive_public_key(&self.public_key()?, &chaincode, subpath)?;
        Ok(child)
    }

    /// Sign through the parent wallet with this account's derivation
    /// offset applied.
    pub async fn sign(
        &self,
        env: &Env,
        wallet: &Wallet,
        digest: &[u8],
        keys: Vec<KeyDescription>,
    ) -> Result<Vec<u8>, WalletError> {
        if wallet.id != self.wallet {
            return Err(WalletError::InvalidConfiguration(
                "account does not belong to this wallet".into(),
            ));
        }
        let opts = SignOptions { il: Some(self.il_scalar()?), keys };
        wallet.sign(env, digest, &opts).await
    }

    /// Remove the account, announcing the deletion first.
    pub fn delete(&self, env: &Env) -> Result<(), WalletError> {
        env.events.emit(WalletEvent::AccountDeleted(self.id.clone()));
        env.accounts
            .delete(&self.id)
            .map_err(|e| WalletError::Store(format!("failed to delete account {}: {e}", self.id)))?;
        Ok(())
    }
}

/// Event-driven collaborators around accounts: seed account #0 when a
/// wallet is restored, cascade-delete accounts when a wallet goes away.
pub fn spawn_event_tasks(env: &Env) -> tokio::task::JoinHandle<()> {
    use tokio::sync::broadcast::error::RecvError;

    let env = env.clone();
    let mut rx = env.events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(WalletEvent::Restored(wallet)) => {
                    if let Err(e) = Account::create(&env, &wallet, "Account 1", 0) {
                        tracing::warn!(wallet = %wallet.id, error = %e, "failed to seed account");
                    }
                }
                Ok(WalletEvent::Deleted(wallet_id)) => match env.accounts.for_wallet(&wallet_id) {
                    Ok(accounts) => {
                        for account in accounts {
                            if let Err(e) = account.delete(&env) {
                                tracing::warn!(account = %account.id, error = %e, "cascade delete failed");
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(wallet = %wallet_id, error = %e, "failed to list accounts")
                    }
                },
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::CredentialKind;
    use crate::protocol::PreParams;
    use crate::wallet::WalletKey;
    use k256::elliptic_curve::Field;
    use k256::ProjectivePoint;

    /// A wallet with a known public key, no protocol run needed.
    fn fixture_wallet() -> Wallet {
        let mut rng = rand::thread_rng();
        let secret = Scalar::random(&mut rng);
        let point = ProjectivePoint::GENERATOR * secret;
        let mut wallet = Wallet::new("fixture", 1);
        wallet.curve = crate::wallet::CURVE_SECP256K1.to_string();
        wallet.pubkey = util::b64(point.to_affine().to_encoded_point(true).as_bytes());
        wallet.chaincode = util::b64(&[9u8; 32]);
        wallet.keys = vec![WalletKey::create(
            &wallet.id,
            CredentialKind::Plain,
            0,
            PreParams::generate(1),
        )];
        wallet
    }

    #[test]
    fn create_memoises_the_derivation() {
        let env = Env::in_memory();
        let wallet = fixture_wallet();
        let account = Account::create(&env, &wallet, "Account 1", 7).unwrap();

        assert_eq!(account.path, "m/44/60/0/7");
        let (il, child) = hd::derive_public_key(
            &wallet.public_key().unwrap(),
            &wallet.chaincode_bytes().unwrap(),
            "m/44/60/0/7",
        )
        .unwrap();
        assert_eq!(account.il_scalar().unwrap(), il);
        assert_eq!(account.public_key().unwrap(), child);

        // Persisted.
        assert!(env.accounts.get(&account.id).unwrap().is_some());
    }

    #[test]
    fn derive_public_descends_from_the_account_key() {
        let env = Env::in_memory();
        let wallet = fixture_wallet();
        let account = Account::create(&env, &wallet, "Account 1", 0).unwrap();
        let grandchild = account.derive_public("m/0").unwrap();
        assert_ne!(grandchild, account.public_key().unwrap());
    }
}
