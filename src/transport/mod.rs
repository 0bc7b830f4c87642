//! Per-party transport: local state machines, the message router, and
//! the relayed remote party.
//!
//! A [`Party`] is anything that can be started exactly once and fed
//! incoming wire messages. Local parties wrap the protocol state machines
//! in [`crate::protocol`]; the [`remote::RemoteParty`] stands in for the
//! single remotely-held share and bridges the run onto the end-to-end
//! encrypted relay.

pub mod api;
pub mod relay;
pub mod remote;
pub mod router;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::WalletError;
use crate::protocol::PartyId;

/// A protocol participant as seen by the router and the relay dispatch.
#[async_trait]
pub trait Party: Send + Sync {
    /// Start the party. Called exactly once per protocol run; a failed
    /// start aborts the whole orchestration.
    async fn start(&self) -> Result<(), WalletError>;

    /// Feed an incoming wire message. Returns whether the message was
    /// accepted.
    async fn update(
        &self,
        wire: &[u8],
        from: &PartyId,
        is_broadcast: bool,
    ) -> Result<bool, WalletError>;
}

/// The party set of one protocol run, keyed by participant id.
pub type PartyMap = Arc<HashMap<String, Arc<dyn Party>>>;
