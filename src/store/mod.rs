//! Entity-typed persistence contracts.
//!
//! The hosting process supplies one repository per entity; the core
//! never sees a reflective "save anything" layer. All writes are upserts
//! on the primary key and every error is returned to the caller. Share
//! rows are indexed by `(wallet, generation)`: loading a wallet only
//! surfaces the active generation, older rows stay behind for recovery
//! until a compaction policy drops them.

pub mod memory;

use crate::account::Account;
use crate::error::WalletError;
use crate::id::Xid;
use crate::wallet::{Wallet, WalletKey};

impl From<StoreError> for WalletError {
    fn from(e: StoreError) -> Self {
        WalletError::Store(e.0)
    }
}

/// Opaque store backend failure.
#[derive(Debug, Clone)]
pub struct StoreError(pub String);

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for StoreError {}

/// Wallet rows. The row never embeds the shares; those live in
/// [`ShareStore`] and are joined by generation on load.
pub trait WalletStore: Send + Sync {
    fn upsert(&self, wallet: &Wallet) -> Result<(), StoreError>;
    fn get(&self, id: &Xid) -> Result<Option<Wallet>, StoreError>;
    fn all(&self) -> Result<Vec<Wallet>, StoreError>;
    fn delete(&self, id: &Xid) -> Result<(), StoreError>;
    fn count(&self) -> Result<usize, StoreError>;
}

/// Share rows, uniquely keyed by share id.
pub trait ShareStore: Send + Sync {
    fn upsert(&self, share: &WalletKey) -> Result<(), StoreError>;
    /// The active share set of a wallet: exactly the rows matching
    /// `(wallet, gen)`.
    fn find(&self, wallet: &Xid, gen: u64) -> Result<Vec<WalletKey>, StoreError>;
    /// Remove every generation of a wallet's shares.
    fn delete_for_wallet(&self, wallet: &Xid) -> Result<(), StoreError>;
}

/// Account rows.
pub trait AccountStore: Send + Sync {
    fn upsert(&self, account: &Account) -> Result<(), StoreError>;
    fn get(&self, id: &Xid) -> Result<Option<Account>, StoreError>;
    fn for_wallet(&self, wallet: &Xid) -> Result<Vec<Account>, StoreError>;
    fn delete(&self, id: &Xid) -> Result<(), StoreError>;
}
