//! Fan-out of outbound protocol messages.
//!
//! The router drains the run's shared outbound channel. A broadcast goes
//! to every party except the sender; a targeted message goes to each
//! listed recipient. Deliveries are fire-and-forget tasks: the protocol
//! state machines serialise their own state, so no cross-party ordering
//! is imposed here. Unknown recipient ids are logged and skipped.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::Outgoing;
use crate::transport::PartyMap;

/// Handle to a running router task; aborts the loop when dropped, which
/// is how an orchestrator ends routing for a finished run.
pub struct RouterHandle(JoinHandle<()>);

impl Drop for RouterHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Spawn the routing loop for one protocol run.
pub fn spawn(parties: PartyMap, mut rx: mpsc::UnboundedReceiver<Outgoing>) -> RouterHandle {
    let handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match &msg.to {
                None => {
                    for (id, party) in parties.iter() {
                        if *id == msg.from.id {
                            continue;
                        }
                        deliver(party.clone(), msg.clone(), true);
                    }
                }
                Some(targets) => {
                    for target in targets {
                        let Some(party) = parties.get(target) else {
                            tracing::warn!(id = %target, "router: id not found");
                            continue;
                        };
                        deliver(party.clone(), msg.clone(), msg.is_broadcast);
                    }
                }
            }
        }
    });
    RouterHandle(handle)
}

fn deliver(party: std::sync::Arc<dyn crate::transport::Party>, msg: Outgoing, is_broadcast: bool) {
    tokio::spawn(async move {
        match party.update(&msg.body, &msg.from, is_broadcast).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(from = %msg.from.id, "router: update not accepted"),
            Err(e) => tracing::warn!(from = %msg.from.id, error = %e, "router: update failed"),
        }
    });
}
