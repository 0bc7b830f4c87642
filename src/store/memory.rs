//! In-memory repositories, used by tests and by hosts that keep the
//! wallet database elsewhere.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::account::Account;
use crate::id::Xid;
use crate::store::{AccountStore, ShareStore, StoreError, WalletStore};
use crate::wallet::{Wallet, WalletKey};

#[derive(Default)]
pub struct MemoryWalletStore {
    rows: RwLock<HashMap<String, Wallet>>,
}

impl MemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WalletStore for MemoryWalletStore {
    fn upsert(&self, wallet: &Wallet) -> Result<(), StoreError> {
        let mut row = wallet.clone();
        // Shares are not part of the wallet row.
        row.keys.clear();
        self.rows.write().insert(wallet.id.to_string(), row);
        Ok(())
    }

    fn get(&self, id: &Xid) -> Result<Option<Wallet>, StoreError> {
        Ok(self.rows.read().get(&id.to_string()).cloned())
    }

    fn all(&self) -> Result<Vec<Wallet>, StoreError> {
        let mut wallets: Vec<Wallet> = self.rows.read().values().cloned().collect();
        wallets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(wallets)
    }

    fn delete(&self, id: &Xid) -> Result<(), StoreError> {
        self.rows.write().remove(&id.to_string());
        Ok(())
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.rows.read().len())
    }
}

#[derive(Default)]
pub struct MemoryShareStore {
    rows: RwLock<HashMap<String, WalletKey>>,
}

impl MemoryShareStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ShareStore for MemoryShareStore {
    fn upsert(&self, share: &WalletKey) -> Result<(), StoreError> {
        self.rows.write().insert(share.id.to_string(), share.strip_transient());
        Ok(())
    }

    fn find(&self, wallet: &Xid, gen: u64) -> Result<Vec<WalletKey>, StoreError> {
        let wallet = wallet.to_string();
        let mut shares: Vec<WalletKey> = self
            .rows
            .read()
            .values()
            .filter(|k| k.wallet.to_string() == wallet && k.gen == gen)
            .cloned()
            .collect();
        shares.sort_by_key(|k| k.id.to_string());
        Ok(shares)
    }

    fn delete_for_wallet(&self, wallet: &Xid) -> Result<(), StoreError> {
        let wallet = wallet.to_string();
        self.rows.write().retain(|_, k| k.wallet.to_string() != wallet);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAccountStore {
    rows: RwLock<HashMap<String, Account>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountStore for MemoryAccountStore {
    fn upsert(&self, account: &Account) -> Result<(), StoreError> {
        self.rows.write().insert(account.id.to_string(), account.clone());
        Ok(())
    }

    fn get(&self, id: &Xid) -> Result<Option<Account>, StoreError> {
        Ok(self.rows.read().get(&id.to_string()).cloned())
    }

    fn for_wallet(&self, wallet: &Xid) -> Result<Vec<Account>, StoreError> {
        let wallet = wallet.to_string();
        let mut accounts: Vec<Account> = self
            .rows
            .read()
            .values()
            .filter(|a| a.wallet.to_string() == wallet)
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.index);
        Ok(accounts)
    }

    fn delete(&self, id: &Xid) -> Result<(), StoreError> {
        self.rows.write().remove(&id.to_string());
        Ok(())
    }
}
