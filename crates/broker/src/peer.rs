use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use protocol::Envelope;

use crate::error::BrokerError;
use crate::record::ChildRecord;

/// Bound on a peer's outbound queue before the fail-fast back-pressure policy kicks in (§4.B).
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Grace period granted to a full outbound queue before `send` gives up with `queue_full`.
pub const SEND_GRACE: std::time::Duration = std::time::Duration::from_millis(200);

/// One connection the router can route to or receive from (§4.D "Peer").
///
/// A child is a peer with a [`ChildRecord`] attached (restart policy, pid, lifecycle); a
/// gateway UDS connection is a peer without one — it can only originate routed requests.
#[derive(Clone)]
pub struct Peer {
    pub id: String,
    outbound: mpsc::Sender<Envelope>,
    pub child: Option<Arc<Mutex<ChildRecord>>>,
}

impl Peer {
    pub fn new_child(id: String, outbound: mpsc::Sender<Envelope>, record: Arc<Mutex<ChildRecord>>) -> Self {
        Self {
            id,
            outbound,
            child: Some(record),
        }
    }

    pub fn new_gateway(id: String, outbound: mpsc::Sender<Envelope>) -> Self {
        Self {
            id,
            outbound,
            child: None,
        }
    }

    pub fn is_child(&self) -> bool {
        self.child.is_some()
    }

    /// Enqueues `envelope` for delivery, honoring the fail-fast back-pressure policy: a
    /// non-blocking attempt first, then one bounded retry, then `queue_full` (§4.B).
    pub async fn send(&self, envelope: Envelope) -> Result<(), BrokerError> {
        match self.outbound.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                match tokio::time::timeout(SEND_GRACE, self.outbound.send(envelope)).await {
                    Ok(Ok(())) => Ok(()),
                    _ => Err(BrokerError::QueueFull(self.id.clone())),
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(BrokerError::Transport(format!(
                "outbound transport to `{}` is closed",
                self.id
            ))),
        }
    }
}

/// Builds a bounded outbound channel sized per [`OUTBOUND_QUEUE_CAPACITY`].
pub fn outbound_channel() -> (mpsc::Sender<Envelope>, mpsc::Receiver<Envelope>) {
    mpsc::channel(OUTBOUND_QUEUE_CAPACITY)
}
