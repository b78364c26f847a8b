//! Pure per-process transition layer.
//!
//! [`ProcessState`] composes the clock, the voter and the requester of one
//! process. Every entry point is a plain function of the current state and
//! one input that returns the [`Action`]s to perform, so the whole protocol
//! can be driven without a network or a runtime. The async controller and
//! the simulation harness both sit on top of this type.

use coterie_types::{
    LogicalClock, LogicalTime, Message, MessageKind, ProcessId, RequestSetTable,
};
use tracing::{debug, trace};

use crate::error::{MutexError, ProtocolViolation};
use crate::requester::{InquiryDecision, RequesterProgress, RequesterState};
use crate::router::{Envelope, Role, route};
use crate::status::StatusSnapshot;
use crate::voter::{VoterReply, VoterState};

/// Something the owner of a [`ProcessState`] must do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Send a message.
    Send(Envelope),
    /// The quorum is complete: run the critical section for `epoch`.
    EnterCriticalSection {
        /// Request epoch that won.
        epoch: u64,
    },
    /// An INQUIRE from `voter` cannot be answered yet. Call
    /// [`ProcessState::resolve_inquiry`] once the requester progress settles it.
    AwaitInquiry {
        /// Voter that sent the INQUIRE.
        voter: ProcessId,
        /// Request epoch the INQUIRE arrived in.
        epoch: u64,
    },
}

/// Clock, voter and requester of one process.
#[derive(Debug)]
pub struct ProcessState {
    id: ProcessId,
    clock: LogicalClock,
    request_set: Vec<ProcessId>,
    voter: VoterState,
    requester: RequesterState,
}

impl ProcessState {
    /// Build the state of process `id` from a validated table.
    pub fn new(id: ProcessId, table: &RequestSetTable) -> Result<Self, MutexError> {
        let request_set: Vec<ProcessId> = table.request_set(id)?.iter().copied().collect();
        Ok(Self {
            id,
            clock: LogicalClock::new(),
            requester: RequesterState::new(request_set.len()),
            request_set,
            voter: VoterState::new(),
        })
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Members this process collects votes from, ascending.
    pub fn request_set(&self) -> &[ProcessId] {
        &self.request_set
    }

    pub fn clock(&self) -> LogicalTime {
        self.clock.now()
    }

    /// Overwrite the logical clock.
    pub fn set_clock(&mut self, time: LogicalTime) {
        self.clock.set(time);
    }

    pub fn voter(&self) -> &VoterState {
        &self.voter
    }

    pub fn requester(&self) -> &RequesterState {
        &self.requester
    }

    pub fn progress(&self) -> RequesterProgress {
        self.requester.progress()
    }

    pub fn in_critical_section(&self) -> bool {
        self.requester.in_critical_section()
    }

    /// Open a new request and multicast REQUEST to the request set.
    ///
    /// Returns the request epoch and the sends to perform.
    pub fn request_critical_section(&mut self) -> Result<(u64, Vec<Action>), MutexError> {
        let epoch = self.requester.begin()?;
        let actions = self.multicast(MessageKind::Request);
        debug!(process = %self.id, epoch, ts = self.clock.now(), "requesting critical section");
        Ok((epoch, actions))
    }

    /// Handle one inbound message.
    ///
    /// The clock observes the message first. A [`ProtocolViolation`] leaves
    /// voter and requester untouched.
    pub fn handle(&mut self, msg: Message) -> Result<Vec<Action>, ProtocolViolation> {
        self.clock.observe(msg.timestamp);
        trace!(process = %self.id, %msg, clock = self.clock.now(), "handling");

        match route(msg.kind) {
            Role::Voter => self.handle_as_voter(msg),
            Role::Requester => self.handle_as_requester(msg),
        }
    }

    fn handle_as_voter(&mut self, msg: Message) -> Result<Vec<Action>, ProtocolViolation> {
        let reply = match msg.kind {
            MessageKind::Request => self.voter.on_request(msg)?,
            MessageKind::Relinquish => Some(self.voter.on_relinquish(msg.origin)?),
            MessageKind::Release => self.voter.on_release(msg.origin)?,
            _ => None,
        };
        Ok(reply
            .map(|VoterReply { to, kind }| vec![self.send(to, kind)])
            .unwrap_or_default())
    }

    fn handle_as_requester(&mut self, msg: Message) -> Result<Vec<Action>, ProtocolViolation> {
        match msg.kind {
            MessageKind::Grant => {
                if self.requester.on_grant(msg.origin)? {
                    return Ok(vec![Action::EnterCriticalSection {
                        epoch: self.requester.epoch(),
                    }]);
                }
                if self.requester.take_deferred_inquiry(msg.origin) {
                    return self.answer_inquiry(msg.origin);
                }
                Ok(Vec::new())
            }
            MessageKind::Postponed => {
                if !self.requester.on_postponed() {
                    trace!(process = %self.id, from = %msg.origin, "stale postponed ignored");
                }
                Ok(Vec::new())
            }
            MessageKind::Inquire => self.answer_inquiry(msg.origin),
            _ => Ok(Vec::new()),
        }
    }

    fn answer_inquiry(&mut self, voter: ProcessId) -> Result<Vec<Action>, ProtocolViolation> {
        match self.requester.inquiry(voter)? {
            InquiryDecision::Relinquish => Ok(vec![self.relinquish_to(voter)]),
            InquiryDecision::Wait => Ok(vec![Action::AwaitInquiry {
                voter,
                epoch: self.requester.epoch(),
            }]),
            InquiryDecision::Defer => {
                trace!(process = %self.id, %voter, "inquire ahead of its grant, deferred");
                self.requester.defer_inquiry(voter);
                Ok(Vec::new())
            }
            InquiryDecision::Moot => Ok(Vec::new()),
        }
    }

    /// Answer a parked INQUIRE from `voter` received during `epoch`.
    ///
    /// Relinquishes only if that request is still collecting votes, still
    /// holds the voter's vote, and has been postponed. Otherwise the inquiry
    /// is moot and nothing is sent.
    pub fn resolve_inquiry(&mut self, voter: ProcessId, epoch: u64) -> Vec<Action> {
        if self.requester.epoch() != epoch {
            return Vec::new();
        }
        match self.requester.inquiry(voter) {
            Ok(InquiryDecision::Relinquish) => vec![self.relinquish_to(voter)],
            _ => Vec::new(),
        }
    }

    /// Leave the critical section of `epoch` and multicast RELEASE.
    pub fn finish_critical_section(&mut self, epoch: u64) -> Result<Vec<Action>, ProtocolViolation> {
        self.requester.finish(epoch)?;
        Ok(self.multicast(MessageKind::Release))
    }

    /// Diagnostic snapshot of both roles.
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot::capture(self)
    }

    fn relinquish_to(&mut self, voter: ProcessId) -> Action {
        self.requester.relinquish(voter);
        debug!(process = %self.id, %voter, collected = self.requester.votes_collected(), "relinquishing vote");
        self.send(voter, MessageKind::Relinquish)
    }

    fn send(&mut self, to: ProcessId, kind: MessageKind) -> Action {
        let message = Message::new(self.id, self.clock.tick(), kind);
        Action::Send(Envelope { to, message })
    }

    fn multicast(&mut self, kind: MessageKind) -> Vec<Action> {
        let message = Message::new(self.id, self.clock.tick(), kind);
        self.request_set
            .iter()
            .map(|&to| Action::Send(Envelope { to, message }))
            .collect()
    }
}
