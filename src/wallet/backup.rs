//! Wallet backup and restore.
//!
//! A backup artefact is a list of `{filename, data}` entries, one per
//! wallet: `wallet_<base64url(id bytes)>.dat` carrying base64url of the
//! wallet's JSON, shares included (ciphertext only; transient protocol
//! state never serialises). Restore is newer-wins on the `Modified`
//! stamp and reports what the caller should re-upload; two legacy
//! filenames carrying a nested entry list in a pre-generation schema are
//! migrated recursively.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::env::Env;
use crate::error::WalletError;
use crate::events::WalletEvent;
use crate::id::Xid;
use crate::util;
use crate::wallet::{Wallet, WalletKey};

/// Legacy artefact names accepted on restore.
const LEGACY_FILENAMES: [&str; 2] = ["backup_data.json", "flutter_app_starter__backup.json"];

/// One backup file: name plus base64url payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupEntry {
    pub filename: String,
    pub data: String,
}

/// One failed entry in a restore run.
#[derive(Clone, Debug, Serialize)]
pub struct RestoreError {
    pub filename: String,
    pub message: String,
}

/// Outcome of a restore run.
#[derive(Default, Serialize)]
pub struct RestoreReport {
    /// The caller should re-upload the entries in `backup`.
    pub update: bool,
    /// Legacy artefacts the caller should remove after migration.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub delete: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<RestoreError>,
    /// Fresh backups of wallets that are newer locally or missing from
    /// the payload.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub backup: Vec<BackupEntry>,
    #[serde(rename = "restore_count")]
    pub restored: usize,
    #[serde(rename = "existing_count")]
    pub existing: usize,
    /// Local wallets absent from the backup payload.
    #[serde(rename = "missing_count")]
    pub missing: usize,
    #[serde(skip)]
    checked: HashSet<String>,
}

/// Pre-generation wallet shape found inside legacy artefacts.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LegacyWallet {
    id: Xid,
    #[serde(default)]
    name: String,
    #[serde(default)]
    curve: String,
    #[serde(default)]
    keys: Vec<WalletKey>,
    #[serde(default)]
    pubkey: String,
    #[serde(default)]
    chaincode: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    created: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    updated: DateTime<Utc>,
}

impl LegacyWallet {
    fn upgrade(self) -> Wallet {
        Wallet {
            id: self.id,
            name: self.name,
            curve: self.curve,
            // Pre-generation wallets were all created 1-of-N.
            threshold: 1,
            gen: 0,
            pubkey: self.pubkey,
            chaincode: self.chaincode,
            created: self.created,
            modified: self.updated,
            keys: self.keys,
        }
    }
}

/// Serialise one wallet into its backup entry. Wallets with no shares
/// refuse to back up.
pub fn backup_wallet(wallet: &Wallet) -> Result<BackupEntry, WalletError> {
    if wallet.keys.is_empty() {
        return Err(WalletError::InvalidConfiguration(
            "wallet has no keys, cannot be backed up".into(),
        ));
    }
    let buf = serde_json::to_vec(wallet)
        .map_err(|e| WalletError::BackupMalformed(format!("encode: {e}")))?;
    Ok(BackupEntry {
        filename: format!("wallet_{}.dat", util::b64(wallet.id.bytes())),
        data: util::b64(&buf),
    })
}

/// Back up every wallet.
pub fn backup_all(env: &Env) -> Result<Vec<BackupEntry>, WalletError> {
    Wallet::all(env)?.iter().map(backup_wallet).collect()
}

/// Restore a backup payload. Per-entry failures are reported, not fatal;
/// the report also carries fresh backups of anything the caller's copy
/// is missing or has stale.
pub fn restore(env: &Env, files: &[BackupEntry]) -> Result<RestoreReport, WalletError> {
    let mut report = RestoreReport::default();
    restore_files(env, files, false, &mut report);

    // Sweep: local wallets the payload did not cover.
    if let Ok(wallets) = Wallet::all(env) {
        for wallet in wallets {
            if report.checked.contains(&wallet.id.to_string()) {
                continue;
            }
            report.missing += 1;
            report.backup.push(backup_wallet(&wallet)?);
        }
    }
    Ok(report)
}

fn restore_files(env: &Env, files: &[BackupEntry], migration: bool, report: &mut RestoreReport) {
    for file in files {
        if file.filename.starts_with("wallet_") {
            if let Err(e) = restore_single(env, &file.filename, &file.data, migration, report) {
                report.errors.push(RestoreError {
                    filename: file.filename.clone(),
                    message: e.to_string(),
                });
            }
        } else if LEGACY_FILENAMES.contains(&file.filename.as_str()) {
            if let Err(e) = restore_legacy(env, &file.filename, &file.data, report) {
                report.errors.push(RestoreError {
                    filename: file.filename.clone(),
                    message: e.to_string(),
                });
            }
        }
    }
}

/// Legacy artefacts hold a raw JSON list of entries; restore it with the
/// migration flag so everything gets re-uploaded in the current format.
fn restore_legacy(
    env: &Env,
    filename: &str,
    data: &str,
    report: &mut RestoreReport,
) -> Result<(), WalletError> {
    let entries: Vec<BackupEntry> = serde_json::from_str(data)
        .map_err(|e| WalletError::BackupMalformed(format!("unknown legacy schema: {e}")))?;
    restore_files(env, &entries, true, report);
    report.update = true;
    report.delete.push(filename.to_string());
    Ok(())
}

fn restore_single(
    env: &Env,
    filename: &str,
    data: &str,
    migration: bool,
    report: &mut RestoreReport,
) -> Result<(), WalletError> {
    let mut trigger_update = migration;

    let key = filename
        .trim_start_matches("wallet_")
        .trim_end_matches(".dat");
    let key_bin = util::b64_decode(key)
        .map_err(|_| WalletError::BackupMalformed("failed to decode key in filename".into()))?;
    let buf = util::b64_decode(data)
        .map_err(|_| WalletError::BackupMalformed("failed to decode file body".into()))?;
    let value: serde_json::Value = serde_json::from_slice(&buf)
        .map_err(|e| WalletError::BackupMalformed(format!("body parse: {e}")))?;

    // Current wallets carry a generation counter; its absence marks the
    // older shape, which is upgraded and re-uploaded.
    let mut saved: Wallet = if value.get("Gen").is_some() {
        serde_json::from_value(value)
            .map_err(|e| WalletError::BackupMalformed(format!("wallet parse: {e}")))?
    } else {
        let legacy: LegacyWallet = serde_json::from_value(value)
            .map_err(|e| WalletError::BackupMalformed(format!("unknown legacy schema: {e}")))?;
        trigger_update = true;
        legacy.upgrade()
    };

    if key_bin.as_slice() != &saved.id.bytes()[..] {
        return Err(WalletError::BackupMalformed(format!(
            "got filename={filename} but inside it was id={}",
            saved.id
        )));
    }
    if saved.keys.is_empty() {
        return Err(WalletError::BackupMalformed("invalid wallet: empty".into()));
    }

    report.checked.insert(saved.id.to_string());

    let Some(current) = env.wallets.get(&saved.id)? else {
        // Not in the local store: insert and let collaborators seed.
        if trigger_update {
            if let Ok(entry) = backup_wallet(&saved) {
                report.backup.push(entry);
            }
        }
        report.restored += 1;
        saved.save(env)?;
        env.events.emit(WalletEvent::Restored(saved));
        return Ok(());
    };

    if saved.modified > current.modified {
        // The backup is newer: overwrite.
        if trigger_update {
            if let Ok(entry) = backup_wallet(&saved) {
                report.backup.push(entry);
            }
        }
        report.restored += 1;
        return saved.save(env);
    }

    report.existing += 1;
    if trigger_update || current.modified > saved.modified {
        // The wallet in the backup is stale; hand the caller a fresh
        // copy to re-upload.
        report.update = true;
        if let Ok(full) = Wallet::by_id(env, &current.id) {
            if let Ok(entry) = backup_wallet(&full) {
                report.backup.push(entry);
            }
        }
    }
    Ok(())
}
