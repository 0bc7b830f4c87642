//! Local multi-party cryptocurrency wallet backend.
//!
//! The core of this crate is the threshold-signature wallet: a wallet's
//! key is generated distributed across N shares with a signing threshold
//! T, each share encrypted at rest under its own credential scheme (one
//! of them optionally held by a remote service behind an end-to-end
//! encrypted relay). Signing drives any T+1 shares through the signing
//! protocol, optionally offset by a BIP32 public-derivation delta so
//! accounts sign with child keys; resharing rotates the share set to a
//! new one without ever materialising the secret or changing the joint
//! public key.
//!
//! The hosting process supplies persistence, the relay and the remote
//! service API through [`Env`]; the protocol parties, message routing,
//! share sealing and backup handling live here.
//!
//! ```no_run
//! # async fn demo() -> Result<(), libwallet::WalletError> {
//! use libwallet::{create_wallet, Env, KeyDescription, ProgressSink, SignOptions};
//! use sha2::{Digest, Sha256};
//!
//! let env = Env::in_memory();
//! let keys = vec![
//!     KeyDescription::plain(),
//!     KeyDescription::password("correct-horse"),
//!     KeyDescription::plain(),
//! ];
//! let wallet = create_wallet(&env, "main", 1, &keys, &ProgressSink::none()).await?;
//!
//! let digest = Sha256::digest(b"hello world");
//! let opts = SignOptions {
//!     il: None,
//!     keys: vec![
//!         KeyDescription::plain().with_id(wallet.keys[0].id.clone()),
//!         KeyDescription::plain().with_id(wallet.keys[2].id.clone()),
//!     ],
//! };
//! let der = wallet.sign(&env, &digest, &opts).await?;
//! # let _ = der;
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod cipher;
pub mod crash;
pub mod env;
pub mod error;
pub mod events;
pub mod hd;
pub mod id;
pub mod pending;
pub mod progress;
pub mod protocol;
pub mod store;
pub mod transport;
pub mod util;
pub mod wallet;

pub use account::Account;
pub use cipher::{
    create_store_key, derive_password_public, Credential, CredentialKind, KeyDescription,
};
pub use env::Env;
pub use error::WalletError;
pub use events::{EventHub, WalletEvent};
pub use id::Xid;
pub use progress::{Progress, ProgressSink};
pub use wallet::backup::{backup_all, backup_wallet, restore, BackupEntry, RestoreReport};
pub use wallet::{create_wallet, SignOptions, Wallet, WalletKey, CURVE_SECP256K1, MIN_CREATE_KEYS};
