//! Error types for request-set configuration.

use crate::ProcessId;

/// Reasons a request-set table is rejected before any process starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuorumError {
    /// The table has no processes at all.
    #[error("request-set table is empty")]
    Empty,

    /// A process has no request set configured.
    #[error("no request set configured for {0}")]
    MissingRequestSet(ProcessId),

    /// A process is not a member of its own request set.
    #[error("{0} is not a member of its own request set")]
    SelfNotMember(ProcessId),

    /// A request set names a process the table does not know.
    #[error("request set of {process} names unknown process {member}")]
    UnknownMember {
        /// Owner of the offending request set.
        process: ProcessId,
        /// The unknown member.
        member: ProcessId,
    },

    /// Two request sets share no process, so mutual exclusion cannot hold.
    #[error("request sets of {0} and {1} do not intersect")]
    Disjoint(ProcessId, ProcessId),

    /// No built-in coterie exists for this group size.
    #[error("no well-known coterie for {0} processes")]
    UnsupportedSize(usize),
}
