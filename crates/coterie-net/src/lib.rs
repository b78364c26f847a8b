//! Point-to-point message transport for coterie.
//!
//! The protocol core only needs two things from the network: a fire-and-forget
//! [`Transport::send_to`] addressed by [`ProcessId`], and an [`Inbox`] callback
//! invoked once per delivered message. This crate provides both seams plus two
//! implementations:
//!
//! - [`TcpTransport`]: length-prefixed postcard frames over pooled tokio TCP
//!   connections, one per peer.
//! - [`LocalNetwork`]: in-process routing between inboxes with an injectable
//!   random latency and failure injection, for tests and the single-binary
//!   demo mode.
//!
//! Delivery is assumed reliable but may be delayed and reordered; nothing here
//! retries a failed send.

mod error;
pub mod frame;
mod local;
mod tcp;

pub use coterie_types::{Message, ProcessId};
pub use error::NetError;
pub use local::{LatencyConfig, LocalNetwork};
pub use tcp::TcpTransport;

/// Outbound side of the network.
///
/// Implementations deliver a single message to a single process. Callers
/// treat a send as fire-and-forget: errors are reported so they can be
/// logged, never retried.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `msg` to process `target`.
    async fn send_to(&self, target: ProcessId, msg: &Message) -> Result<(), NetError>;
}

/// Inbound side of the network: receives every message addressed to one process.
pub trait Inbox: Send + Sync {
    /// Hand a delivered message to the owning process. Must not block.
    fn deliver(&self, msg: Message);
}
