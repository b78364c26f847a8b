//! The requesting side of a process: collecting votes for its own critical section.
//!
//! Each call to [`RequesterState::begin`] opens a new request *epoch*. GRANTs
//! are recorded per voter until the whole request set has voted, at which
//! point the process enters its critical section. POSTPONED replies only set a
//! flag that is consulted when some voter INQUIREs about a vote this process
//! holds.
//!
//! Messages may be reordered, so an INQUIRE can arrive before the GRANT it is
//! about, or after the request it was meant for has already finished. An
//! INQUIRE from a voter whose vote is not currently held is therefore kept
//! aside and answered once that voter's GRANT shows up. A vote is only ever
//! given back by a voter that granted it in the current epoch, which keeps the
//! count equal to the votes the voters believe this process holds.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::trace;

use coterie_types::ProcessId;

use crate::error::{MutexError, ProtocolViolation};

/// Where the local request stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RequesterPhase {
    /// No request outstanding.
    #[default]
    Idle,
    /// REQUESTs sent, collecting votes.
    Requesting,
    /// All votes collected; the critical section is running.
    InCriticalSection,
}

/// How to answer an INQUIRE right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InquiryDecision {
    /// This request has been postponed elsewhere: give the vote back.
    Relinquish,
    /// Undecided; wait until postponed or until the request wins.
    Wait,
    /// The inquiring voter's GRANT has not arrived yet.
    Defer,
    /// The request already won; no reply is needed.
    Moot,
}

/// Snapshot of the fields an outstanding INQUIRE waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequesterProgress {
    /// Current request epoch.
    pub epoch: u64,
    /// Current phase.
    pub phase: RequesterPhase,
    /// Whether the current request has been postponed.
    pub postponed: bool,
}

impl RequesterProgress {
    /// Whether an INQUIRE received during `epoch` can now be answered.
    pub fn settles_inquiry(&self, epoch: u64) -> bool {
        self.epoch != epoch || self.phase != RequesterPhase::Requesting || self.postponed
    }
}

/// Per-process request driver.
#[derive(Debug)]
pub struct RequesterState {
    votes_needed: usize,
    /// Voters whose GRANT is held for the current epoch.
    granted_by: BTreeSet<ProcessId>,
    /// Voters that inquired before their GRANT arrived.
    deferred: BTreeSet<ProcessId>,
    postponed: bool,
    phase: RequesterPhase,
    epoch: u64,
}

impl RequesterState {
    /// Requester for a request set of `votes_needed` members.
    pub fn new(votes_needed: usize) -> Self {
        Self {
            votes_needed,
            granted_by: BTreeSet::new(),
            deferred: BTreeSet::new(),
            postponed: false,
            phase: RequesterPhase::Idle,
            epoch: 0,
        }
    }

    pub fn votes_needed(&self) -> usize {
        self.votes_needed
    }

    pub fn votes_collected(&self) -> usize {
        self.granted_by.len()
    }

    /// Voters whose vote is currently held, ascending.
    pub fn granted_by(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.granted_by.iter().copied()
    }

    pub fn is_postponed(&self) -> bool {
        self.postponed
    }

    pub fn phase(&self) -> RequesterPhase {
        self.phase
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn in_critical_section(&self) -> bool {
        self.phase == RequesterPhase::InCriticalSection
    }

    /// Start a new request and return its epoch.
    pub fn begin(&mut self) -> Result<u64, MutexError> {
        if self.phase != RequesterPhase::Idle {
            return Err(MutexError::AlreadyRequesting);
        }
        self.epoch += 1;
        self.granted_by.clear();
        self.deferred.clear();
        self.postponed = false;
        self.phase = RequesterPhase::Requesting;
        Ok(self.epoch)
    }

    /// Record a GRANT. Returns `true` when the quorum is complete and the
    /// critical section should start.
    pub fn on_grant(&mut self, from: ProcessId) -> Result<bool, ProtocolViolation> {
        if self.phase != RequesterPhase::Requesting {
            return Err(ProtocolViolation::UnexpectedGrant { from });
        }
        if !self.granted_by.insert(from) {
            return Err(ProtocolViolation::DuplicateGrant { from });
        }
        trace!(%from, collected = self.granted_by.len(), needed = self.votes_needed, "grant counted");

        if self.granted_by.len() == self.votes_needed {
            self.postponed = false;
            self.deferred.clear();
            self.phase = RequesterPhase::InCriticalSection;
            return Ok(true);
        }
        Ok(false)
    }

    /// Record a POSTPONED. Returns `false` if it was stale and ignored.
    pub fn on_postponed(&mut self) -> bool {
        if self.phase != RequesterPhase::Requesting {
            return false;
        }
        self.postponed = true;
        true
    }

    /// Decide how to answer an INQUIRE from `from`.
    pub fn inquiry(&self, from: ProcessId) -> Result<InquiryDecision, ProtocolViolation> {
        match self.phase {
            RequesterPhase::Idle => Err(ProtocolViolation::InquireWhileIdle { from }),
            RequesterPhase::InCriticalSection => Ok(InquiryDecision::Moot),
            RequesterPhase::Requesting if !self.granted_by.contains(&from) => {
                Ok(InquiryDecision::Defer)
            }
            RequesterPhase::Requesting if self.postponed => Ok(InquiryDecision::Relinquish),
            RequesterPhase::Requesting => Ok(InquiryDecision::Wait),
        }
    }

    /// Keep an INQUIRE from `from` until its GRANT arrives.
    pub fn defer_inquiry(&mut self, from: ProcessId) {
        self.deferred.insert(from);
    }

    /// Take the deferred INQUIRE from `from`, if any.
    pub fn take_deferred_inquiry(&mut self, from: ProcessId) -> bool {
        self.deferred.remove(&from)
    }

    /// Give the vote of `voter` back in answer to an INQUIRE.
    pub fn relinquish(&mut self, voter: ProcessId) {
        self.granted_by.remove(&voter);
    }

    /// Leave the critical section of request `epoch`.
    pub fn finish(&mut self, epoch: u64) -> Result<(), ProtocolViolation> {
        if self.phase != RequesterPhase::InCriticalSection || self.epoch != epoch {
            return Err(ProtocolViolation::CriticalSectionNotActive { epoch });
        }
        self.phase = RequesterPhase::Idle;
        self.granted_by.clear();
        self.postponed = false;
        Ok(())
    }

    pub fn progress(&self) -> RequesterProgress {
        RequesterProgress {
            epoch: self.epoch,
            phase: self.phase,
            postponed: self.postponed,
        }
    }
}
