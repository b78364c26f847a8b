//! Error types for the mutual-exclusion core.

use coterie_types::{Message, ProcessId, QuorumError};

/// Errors returned to callers of the mutex API.
#[derive(Debug, thiserror::Error)]
pub enum MutexError {
    /// The request-set configuration is unusable.
    #[error("invalid request-set configuration: {0}")]
    Quorum(#[from] QuorumError),

    /// This process already has a critical-section request in flight.
    #[error("a critical-section request is already outstanding")]
    AlreadyRequesting,

    /// The controller task has stopped.
    #[error("mutex controller has stopped")]
    Stopped,
}

/// A control message that does not fit the local state.
///
/// Out-of-order or duplicate messages are reported through this type, logged,
/// and dropped without touching any state. They are never allowed to free a
/// vote twice.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    /// The same REQUEST is already held or queued.
    #[error("duplicate request {request}")]
    DuplicateRequest {
        /// The repeated request.
        request: Message,
    },

    /// RELEASE arrived while the vote was free.
    #[error("release from {from} while the vote is free")]
    ReleaseWhileFree {
        /// Sender of the RELEASE.
        from: ProcessId,
    },

    /// RELEASE arrived from a process that does not hold the vote.
    #[error("release from {from} but the vote is held by {holder}")]
    ReleaseFromNonHolder {
        /// Sender of the RELEASE.
        from: ProcessId,
        /// Current vote holder.
        holder: ProcessId,
    },

    /// RELINQUISH arrived from a process that does not hold the vote.
    #[error("relinquish from {from} but the vote is held by {holder:?}")]
    RelinquishFromNonHolder {
        /// Sender of the RELINQUISH.
        from: ProcessId,
        /// Current vote holder, if any.
        holder: Option<ProcessId>,
    },

    /// GRANT arrived while no request was collecting votes.
    #[error("grant from {from} while not collecting votes")]
    UnexpectedGrant {
        /// Sender of the GRANT.
        from: ProcessId,
    },

    /// A second GRANT from the same voter within one request.
    #[error("duplicate grant from {from}")]
    DuplicateGrant {
        /// Sender of the GRANT.
        from: ProcessId,
    },

    /// INQUIRE arrived while this process has no request outstanding.
    #[error("inquire from {from} while no request is outstanding")]
    InquireWhileIdle {
        /// Sender of the INQUIRE.
        from: ProcessId,
    },

    /// A critical-section completion did not match the active request.
    #[error("critical section for request epoch {epoch} is not active")]
    CriticalSectionNotActive {
        /// Epoch the completion referred to.
        epoch: u64,
    },
}
