//! Error types surfaced by the wallet core.
//!
//! Credential and transport failures bubble up verbatim to the IPC
//! boundary, so each carries a stable token the frontend can key on.
//! Panics inside protocol workers never escape as panics: they are mapped
//! to [`WalletError::PanicCaught`] with a crash id the user can quote.

use thiserror::Error;

/// Errors produced by the wallet core.
#[derive(Debug, Clone, Error)]
pub enum WalletError {
    /// Threshold out of range, unknown curve, unsupported credential type,
    /// malformed input. Never retried.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A Password credential failed the public-material preflight.
    #[error("wrong password")]
    WrongPassword,

    /// A StoreKey credential failed the public-material preflight.
    #[error("wrong storeKey, try to restore your wallet from the cloud")]
    WrongStoreKey,

    /// Ciphertext or envelope bytes that do not parse or authenticate.
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    /// An MPC party failed to start or reported an internal error.
    /// First error wins; siblings are abandoned.
    #[error("protocol aborted: {0}")]
    ProtocolAborted(String),

    /// Peer selection, relay init or relay send failed. Retryable at the
    /// caller's discretion; the core does not retry on its own.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The 15 second signing budget expired.
    #[error("signature operation timed out")]
    SignatureTimeout,

    /// A persistence contract was violated (e.g. zero shares loaded for
    /// the wallet's active generation).
    #[error("store precondition failed: {0}")]
    StorePrecondition(String),

    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A worker panicked. The raw payload went to the crash log; only the
    /// crash id is surfaced.
    #[error("panic during signature generation, please contact support (crash id {0})")]
    PanicCaught(String),

    /// Backup payloads that do not parse, or whose filename does not match
    /// the wallet inside.
    #[error("malformed backup: {0}")]
    BackupMalformed(String),

    /// Underlying store failure.
    #[error("store failure: {0}")]
    Store(String),
}

impl WalletError {
    /// Stable machine-readable token for the IPC boundary.
    pub fn code(&self) -> &'static str {
        match self {
            WalletError::InvalidConfiguration(_) => "error_invalid_configuration",
            WalletError::WrongPassword => "error_wrong_password",
            WalletError::WrongStoreKey => "error_wrong_store_key",
            WalletError::MalformedCiphertext(_) => "error_malformed_ciphertext",
            WalletError::ProtocolAborted(_) => "error_protocol_aborted",
            WalletError::TransportFailure(_) => "error_transport_failure",
            WalletError::SignatureTimeout => "error_signature_timeout",
            WalletError::StorePrecondition(_) => "error_store_precondition",
            WalletError::NotFound(_) => "error_not_found",
            WalletError::PanicCaught(_) => "error_panic_caught",
            WalletError::BackupMalformed(_) => "error_backup_malformed",
            WalletError::Store(_) => "error_store",
        }
    }
}
