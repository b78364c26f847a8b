//! Message routing: which role handles an inbound message, and how outbound
//! messages leave the process.

use std::sync::Arc;

use coterie_net::Transport;
use coterie_types::{Message, MessageKind, ProcessId};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// The half of a process an inbound message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The vote arbiter.
    Voter,
    /// The local request driver.
    Requester,
}

/// Route a message kind to the role that handles it.
///
/// REQUEST, RELINQUISH and RELEASE drive the voter. GRANT, POSTPONED and
/// INQUIRE are answers to this process's own request and go to the requester.
pub fn route(kind: MessageKind) -> Role {
    match kind {
        MessageKind::Request | MessageKind::Relinquish | MessageKind::Release => Role::Voter,
        MessageKind::Grant | MessageKind::Postponed | MessageKind::Inquire => Role::Requester,
    }
}

/// A message together with its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    /// Destination process.
    pub to: ProcessId,
    /// Stamped message.
    pub message: Message,
}

/// Fire-and-forget outbound dispatch.
///
/// Every send runs on its own task so the actor never waits on the network.
/// A semaphore bounds how many sends may be in flight at once; failures are
/// logged and the message is abandoned.
#[derive(Clone)]
pub struct Outbox {
    local: ProcessId,
    transport: Arc<dyn Transport>,
    permits: Arc<Semaphore>,
}

impl Outbox {
    /// Create an outbox allowing `max_inflight` concurrent sends.
    pub fn new(local: ProcessId, transport: Arc<dyn Transport>, max_inflight: usize) -> Self {
        Self {
            local,
            transport,
            permits: Arc::new(Semaphore::new(max_inflight.max(1))),
        }
    }

    /// Hand an envelope to the transport without waiting for it.
    pub fn dispatch(&self, envelope: Envelope) {
        let local = self.local;
        let transport = Arc::clone(&self.transport);
        let permits = Arc::clone(&self.permits);

        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let Envelope { to, message } = envelope;
            match transport.send_to(to, &message).await {
                Ok(()) => debug!(process = %local, %to, %message, "sent"),
                Err(e) => warn!(process = %local, %to, %message, %e, "send failed, message abandoned"),
            }
        });
    }
}
