//! Shared types for coterie.
//!
//! This crate defines the values every other crate in the workspace passes
//! around: process identifiers ([`ProcessId`]), protocol messages
//! ([`Message`], [`MessageKind`]) with their total priority order, the
//! per-process Lamport clock ([`LogicalClock`]), and the static quorum table
//! ([`RequestSetTable`]).

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

mod error;
pub mod quorum;

pub use error::QuorumError;
pub use quorum::RequestSetTable;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifier of one peer process in the mutual-exclusion group.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(u32);

impl ProcessId {
    /// Wrap a raw process number.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Return the raw process number.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for ProcessId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

impl FromStr for ProcessId {
    type Err = std::num::ParseIntError;

    /// Accepts `"3"` as well as the display form `"P3"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s
            .strip_prefix('P')
            .or_else(|| s.strip_prefix('p'))
            .unwrap_or(s);
        digits.parse::<u32>().map(Self)
    }
}

/// Scalar Lamport timestamp.
pub type LogicalTime = u64;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The six control messages of the quorum-voting protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageKind {
    /// Ask a voter for its vote.
    Request,
    /// A voter hands its vote to a requester.
    Grant,
    /// A requester leaves its critical section and returns the vote.
    Release,
    /// A voter asks the holder of its vote whether it will yield.
    Inquire,
    /// The holder gives the vote back in answer to an inquire.
    Relinquish,
    /// A voter tells a requester it has to wait behind a higher priority request.
    Postponed,
}

impl MessageKind {
    /// Upper-case protocol name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "REQUEST",
            Self::Grant => "GRANT",
            Self::Release => "RELEASE",
            Self::Inquire => "INQUIRE",
            Self::Relinquish => "RELINQUISH",
            Self::Postponed => "POSTPONED",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable protocol message stamped by its sender.
///
/// Messages are totally ordered by `(timestamp, origin)`, both ascending:
/// the smaller message has the higher priority. The kind only breaks ties
/// between otherwise identical stamps so that `Ord` agrees with `Eq`; a
/// process never emits two messages with the same stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    /// Process that sent the message.
    pub origin: ProcessId,
    /// Sender's clock value when the message was created.
    pub timestamp: LogicalTime,
    /// What the message asks for.
    pub kind: MessageKind,
}

impl Message {
    /// Create a message.
    pub fn new(origin: ProcessId, timestamp: LogicalTime, kind: MessageKind) -> Self {
        Self {
            origin,
            timestamp,
            kind,
        }
    }

    /// Return `true` if `self` strictly outranks `other` in the priority order.
    pub fn precedes(&self, other: &Message) -> bool {
        (self.timestamp, self.origin) < (other.timestamp, other.origin)
    }
}

impl Ord for Message {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.origin.cmp(&other.origin))
            .then_with(|| self.kind.cmp(&other.kind))
    }
}

impl PartialOrd for Message {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{},{}]", self.kind, self.origin, self.timestamp)
    }
}

// ---------------------------------------------------------------------------
// Logical clock
// ---------------------------------------------------------------------------

/// Per-process scalar Lamport clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogicalClock(LogicalTime);

impl LogicalClock {
    /// A clock starting at zero.
    pub fn new() -> Self {
        Self(0)
    }

    /// A clock starting at `time`.
    pub fn at(time: LogicalTime) -> Self {
        Self(time)
    }

    /// Current value.
    pub fn now(&self) -> LogicalTime {
        self.0
    }

    /// Advance for a local send and return the new stamp.
    pub fn tick(&mut self) -> LogicalTime {
        self.0 += 1;
        self.0
    }

    /// Merge a received stamp: `max(local, remote) + 1`.
    pub fn observe(&mut self, remote: LogicalTime) -> LogicalTime {
        self.0 = self.0.max(remote) + 1;
        self.0
    }

    /// Overwrite the clock value.
    pub fn set(&mut self, time: LogicalTime) {
        self.0 = time;
    }
}
