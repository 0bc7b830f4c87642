//! Backup and restore: full round trip, newer-wins conflict handling,
//! legacy artefact migration, and the restored event seeding an account.

use chrono::Duration;
use sha2::{Digest, Sha256};

use libwallet::wallet::Wallet;
use libwallet::{
    backup_all, backup_wallet, create_wallet, restore, BackupEntry, Env, KeyDescription,
    ProgressSink, SignOptions, WalletEvent,
};

async fn plain_wallet(env: &Env, name: &str) -> Wallet {
    create_wallet(env, name, 1, &vec![KeyDescription::plain(); 3], &ProgressSink::none())
        .await
        .expect("wallet creation")
}

#[tokio::test]
async fn restore_reproduces_the_wallet_exactly() {
    let env = Env::in_memory();
    let wallet = plain_wallet(&env, "roundtrip").await;
    let entries = backup_all(&env).unwrap();
    assert_eq!(entries.len(), 1);

    // Restore into a fresh environment.
    let env2 = Env::in_memory();
    let report = restore(&env2, &entries).unwrap();
    assert_eq!(report.restored, 1);
    assert_eq!(report.existing, 0);
    assert_eq!(report.missing, 0);
    assert!(report.errors.is_empty());

    let restored = Wallet::by_id(&env2, &wallet.id).unwrap();
    assert_eq!(restored.pubkey, wallet.pubkey);
    assert_eq!(restored.chaincode, wallet.chaincode);
    assert_eq!(restored.gen, wallet.gen);
    assert_eq!(restored.keys.len(), 3);
    for (a, b) in restored.keys.iter().zip(&wallet.keys) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.data, b.data, "ciphertext bytes survive the round trip");
    }

    // The restored shares still sign.
    let digest = Sha256::digest(b"post-restore");
    let opts = SignOptions {
        il: None,
        keys: restored.keys[..2]
            .iter()
            .map(|k| KeyDescription::plain().with_id(k.id.clone()))
            .collect(),
    };
    restored.sign(&env2, &digest, &opts).await.expect("restored wallet signs");
}

#[tokio::test]
async fn restoring_twice_counts_as_existing() {
    let env = Env::in_memory();
    let _wallet = plain_wallet(&env, "idempotent").await;
    let entries = backup_all(&env).unwrap();

    let report = restore(&env, &entries).unwrap();
    assert_eq!(report.restored, 0);
    assert_eq!(report.existing, 1);
    assert!(!report.update);
}

#[tokio::test]
async fn stale_backup_triggers_a_reupload_of_the_local_wallet() {
    let env = Env::in_memory();
    let mut wallet = plain_wallet(&env, "delta").await;
    let snapshot = backup_all(&env).unwrap();

    // Local copy moves forward.
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    wallet.rename(&env, "delta-renamed").unwrap();

    let report = restore(&env, &snapshot).unwrap();
    assert_eq!(report.existing, 1);
    assert!(report.update, "caller must re-upload");
    assert_eq!(report.backup.len(), 1);

    // The entry carried back is the newer local version.
    let body = libwallet::util::b64_decode(&report.backup[0].data).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["Name"], serde_json::json!("delta-renamed"));
}

#[tokio::test]
async fn newer_backup_overwrites_the_local_wallet() {
    let env = Env::in_memory();
    let wallet = plain_wallet(&env, "old-name").await;

    // Craft a backup that is strictly newer.
    let mut newer = Wallet::by_id(&env, &wallet.id).unwrap();
    newer.name = "new-name".to_string();
    newer.modified += Duration::seconds(60);
    let entry = backup_wallet(&newer).unwrap();

    let report = restore(&env, &[entry]).unwrap();
    assert_eq!(report.restored, 1);
    assert_eq!(env.wallets.get(&wallet.id).unwrap().unwrap().name, "new-name");
}

#[tokio::test]
async fn wallets_missing_from_the_payload_are_reported() {
    let env = Env::in_memory();
    let _kept = plain_wallet(&env, "kept").await;
    let report = restore(&env, &[]).unwrap();
    assert_eq!(report.missing, 1);
    assert_eq!(report.backup.len(), 1);
}

#[tokio::test]
async fn restored_event_seeds_an_initial_account() {
    let env = Env::in_memory();
    let wallet = plain_wallet(&env, "seeded").await;
    let entries = backup_all(&env).unwrap();

    let env2 = Env::in_memory();
    let _collab = libwallet::account::spawn_event_tasks(&env2);
    let mut events = env2.events.subscribe();

    let report = restore(&env2, &entries).unwrap();
    assert_eq!(report.restored, 1);

    match events.recv().await.unwrap() {
        WalletEvent::Restored(w) => assert_eq!(w.id, wallet.id),
        other => panic!("unexpected event {}", other.topic()),
    }

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let accounts = env2.accounts.for_wallet(&wallet.id).unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].index, 0);
    assert_eq!(accounts[0].path, "m/44/60/0/0");
}

#[tokio::test]
async fn legacy_artefacts_are_migrated_and_reuploaded() {
    let env = Env::in_memory();

    // Build a pre-generation wallet payload by hand: unix timestamps,
    // an `Updated` field, no `Gen`, no `Threshold`.
    let source_env = Env::in_memory();
    let source = plain_wallet(&source_env, "legacy").await;
    let legacy_json = serde_json::json!({
        "Id": source.id.to_string(),
        "Name": "legacy",
        "Curve": "secp256k1",
        "Keys": serde_json::to_value(&source.keys).unwrap(),
        "Pubkey": source.pubkey,
        "Chaincode": source.chaincode,
        "Created": 1_600_000_000,
        "Updated": 1_600_000_100,
    });
    let inner = BackupEntry {
        filename: format!("wallet_{}.dat", libwallet::util::b64(source.id.bytes())),
        data: libwallet::util::b64(&serde_json::to_vec(&legacy_json).unwrap()),
    };
    let legacy_file = BackupEntry {
        filename: "backup_data.json".to_string(),
        data: serde_json::to_string(&vec![inner]).unwrap(),
    };

    let report = restore(&env, &[legacy_file]).unwrap();
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.restored, 1);
    assert!(report.update, "migration forces a re-upload");
    assert_eq!(report.delete, vec!["backup_data.json".to_string()]);
    // The re-upload is in the current format.
    assert!(!report.backup.is_empty());
    let body = libwallet::util::b64_decode(&report.backup[0].data).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(value.get("Gen").is_some());

    let migrated = Wallet::by_id(&env, &source.id).unwrap();
    assert_eq!(migrated.gen, 0);
    assert_eq!(migrated.threshold, 1);
    assert_eq!(migrated.pubkey, source.pubkey);
}

#[tokio::test]
async fn garbage_payloads_are_collected_as_errors() {
    let env = Env::in_memory();
    let report = restore(
        &env,
        &[
            BackupEntry { filename: "wallet_###.dat".into(), data: "xx".into() },
            BackupEntry {
                filename: "wallet_AAAAAAAAAAAAAAAAAAAAAA.dat".into(),
                data: libwallet::util::b64(b"not json"),
            },
            // Unknown filenames are ignored entirely.
            BackupEntry { filename: "notes.txt".into(), data: "hello".into() },
        ],
    )
    .unwrap();
    assert_eq!(report.errors.len(), 2);
    assert_eq!(report.restored, 0);
}
