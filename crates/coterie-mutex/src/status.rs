//! Diagnostic snapshot of one process.

use std::fmt;

use coterie_types::{LogicalTime, Message, ProcessId};
use serde::Serialize;

use crate::process::ProcessState;
use crate::requester::RequesterPhase;

/// Point-in-time view of a process's voter and requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub process: ProcessId,
    pub clock: LogicalTime,
    /// The local vote is held by someone.
    pub granted: bool,
    pub current_grant: Option<Message>,
    pub inquiring: bool,
    /// Queued REQUESTs in priority order.
    pub pending: Vec<Message>,
    pub phase: RequesterPhase,
    pub epoch: u64,
    pub votes_collected: usize,
    pub votes_needed: usize,
    pub postponed: bool,
}

impl StatusSnapshot {
    pub(crate) fn capture(state: &ProcessState) -> Self {
        let voter = state.voter();
        let requester = state.requester();
        Self {
            process: state.id(),
            clock: state.clock(),
            granted: voter.is_granted(),
            current_grant: voter.current_grant().copied(),
            inquiring: voter.is_inquiring(),
            pending: voter.pending(),
            phase: requester.phase(),
            epoch: requester.epoch(),
            votes_collected: requester.votes_collected(),
            votes_needed: requester.votes_needed(),
            postponed: requester.is_postponed(),
        }
    }

    pub fn in_critical_section(&self) -> bool {
        self.phase == RequesterPhase::InCriticalSection
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Status of {} (clock {}):", self.process, self.clock)?;
        writeln!(f, "\tgranted: {}", self.granted)?;
        match &self.current_grant {
            Some(m) => writeln!(f, "\tcurrent grant: {m}")?,
            None => writeln!(f, "\tcurrent grant: none")?,
        }
        writeln!(f, "\tvotes collected: {}/{}", self.votes_collected, self.votes_needed)?;
        writeln!(f, "\tin CS: {}", self.in_critical_section())?;
        writeln!(f, "\tinquiring: {}", self.inquiring)?;
        writeln!(f, "\tpostponed: {}", self.postponed)?;
        let queue: Vec<String> = self.pending.iter().map(ToString::to_string).collect();
        write!(f, "\trequest queue: [{}]", queue.join(", "))
    }
}
