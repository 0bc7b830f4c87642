//! The relayed remote party: peer-selection timeouts, and a full
//! reshare in which the remotely-held share participates over the relay.

mod common;

use std::time::Duration;

use sha2::{Digest, Sha256};

use common::{MemoryRelay, RemoteSim};
use libwallet::protocol::PartyId;
use libwallet::transport::api::RemoteSignApi;
use libwallet::transport::relay::RelayTimeouts;
use libwallet::transport::remote::{RemoteParty, SessionInit};
use libwallet::transport::{Party, PartyMap};
use libwallet::wallet::Wallet;
use libwallet::{
    create_wallet, Env, KeyDescription, ProgressSink, SignOptions, WalletError, Xid,
};

fn short_timeouts() -> RelayTimeouts {
    RelayTimeouts {
        select_peer: Duration::from_millis(300),
        init: Duration::from_millis(300),
        settle: Duration::from_millis(10),
    }
}

fn dummy_init() -> SessionInit {
    let id = PartyId::from_share_id(&Xid::new("wkey"));
    SessionInit {
        old_peers: vec![id.clone()],
        new_peers: vec![id.clone()],
        name: id,
        old_partycount: 1,
        new_partycount: 1,
        old_threshold: 0,
        new_threshold: 0,
    }
}

#[tokio::test]
async fn unresponsive_relay_peers_fail_peer_selection() {
    // The fleet answers the HTTPS enumeration, but nothing answers the
    // relay pings: start must fail within the selection deadline.
    let sim = RemoteSim::new();
    let relay = MemoryRelay::unresponsive();

    let remote = RemoteParty::new(dummy_init(), "sess-x", sim, relay, short_timeouts());
    remote.set_parties(PartyMap::default());

    let started = std::time::Instant::now();
    let err = remote.start().await.unwrap_err();
    assert!(matches!(err, WalletError::TransportFailure(_)));
    assert!(started.elapsed() < Duration::from_secs(5));

    // The gate keeps returning the same failure without re-running init.
    let err2 = remote.start().await.unwrap_err();
    assert!(matches!(err2, WalletError::TransportFailure(_)));
}

#[tokio::test]
async fn reshare_with_unresponsive_relay_aborts() {
    let sim = RemoteSim::new();
    let live_relay = MemoryRelay::new();
    sim.set_relay(live_relay.clone());
    live_relay.attach(sim.clone());

    // Create with a working relay so the remote share uploads.
    let env = Env::in_memory()
        .with_remote(live_relay, sim.clone())
        .with_relay_timeouts(short_timeouts());
    let session = sim.verify(
        &sim.new_session("+14045551234").await.unwrap().session,
        "000000",
    )
    .await
    .unwrap();
    let descs = vec![
        KeyDescription::plain(),
        KeyDescription::plain(),
        KeyDescription::remote(&session),
    ];
    let mut wallet = create_wallet(&env, "remote", 1, &descs, &ProgressSink::none())
        .await
        .unwrap();

    // Now the relay goes dark; resharing must surface the transport
    // failure from the remote party's start.
    let env = env.with_remote(MemoryRelay::unresponsive(), sim.clone());
    let old = old_descriptions(&wallet, &session);
    let err = wallet
        .reshare(&env, &old, &vec![KeyDescription::plain(); 3], &ProgressSink::none())
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::TransportFailure(_)));
    assert_eq!(wallet.gen, 0, "no generation bump on a failed reshare");
}

fn old_descriptions(wallet: &Wallet, session: &str) -> Vec<KeyDescription> {
    wallet
        .keys
        .iter()
        .map(|k| {
            if k.kind == libwallet::CredentialKind::RemoteKey {
                KeyDescription::remote(session).with_id(k.id.clone())
            } else {
                KeyDescription::plain().with_id(k.id.clone())
            }
        })
        .collect()
}

#[tokio::test]
async fn reshare_runs_with_the_remote_share_over_the_relay() {
    let sim = RemoteSim::new();
    let relay = MemoryRelay::new();
    sim.set_relay(relay.clone());
    relay.attach(sim.clone());

    let env = Env::in_memory()
        .with_remote(relay, sim.clone())
        .with_relay_timeouts(short_timeouts());

    let session = sim.verify(
        &sim.new_session("+14045551234").await.unwrap().session,
        "000000",
    )
    .await
    .unwrap();

    let descs = vec![
        KeyDescription::plain(),
        KeyDescription::plain(),
        KeyDescription::remote(&session),
    ];
    let mut wallet = create_wallet(&env, "remote", 1, &descs, &ProgressSink::none())
        .await
        .unwrap();
    assert!(sim.has_blob(&session));
    let pubkey_before = wallet.pubkey.clone();

    // Reshare: the old committee is the full share set including the
    // remotely-held share, which participates through the relay.
    let old = old_descriptions(&wallet, &session);
    wallet
        .reshare(&env, &old, &vec![KeyDescription::plain(); 3], &ProgressSink::none())
        .await
        .expect("reshare with remote old share");

    assert_eq!(wallet.gen, 1);
    assert_eq!(wallet.pubkey, pubkey_before);
    assert!(wallet.keys.iter().all(|k| k.gen == 1));

    // The rotated shares sign for the unchanged joint key.
    let loaded = Wallet::by_id(&env, &wallet.id).unwrap();
    let digest = Sha256::digest(b"after remote reshare");
    let opts = SignOptions {
        il: None,
        keys: loaded.keys[..2]
            .iter()
            .map(|k| KeyDescription::plain().with_id(k.id.clone()))
            .collect(),
    };
    let der = loaded.sign(&env, &digest, &opts).await.expect("signature");

    use k256::ecdsa::signature::hazmat::PrehashVerifier;
    let sig = k256::ecdsa::Signature::from_der(&der).unwrap();
    let vk = k256::ecdsa::VerifyingKey::from(loaded.public_key().unwrap());
    vk.verify_prehash(&digest, &sig).unwrap();
}
