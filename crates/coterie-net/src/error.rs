//! Error types for network operations.

use coterie_types::ProcessId;

/// Errors that can occur while sending or receiving protocol messages.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// No address or inbox is registered for the target process.
    #[error("unknown peer {0}")]
    UnknownPeer(ProcessId),

    /// The target process is known but currently unreachable.
    #[error("peer {0} is unreachable")]
    Unreachable(ProcessId),

    /// Establishing a connection to a peer failed.
    #[error("connection to {peer} failed: {source}")]
    Connect {
        /// The peer we tried to reach.
        peer: ProcessId,
        /// The underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// Reading or writing a stream failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A frame header announced more bytes than any message can occupy.
    #[error("frame of {0} bytes exceeds the maximum message size")]
    FrameTooLarge(usize),
}
