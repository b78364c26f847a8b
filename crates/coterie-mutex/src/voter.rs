//! Arbitration of the single vote a process owns.
//!
//! A [`VoterState`] hands its vote to at most one requester at a time. Requests
//! that arrive while the vote is taken wait in a priority queue ordered by
//! `(timestamp, origin)`. When a waiting request outranks both the holder and
//! everything else queued, the voter sends one INQUIRE to the holder instead of
//! preempting it; the holder decides whether to RELINQUISH.
//!
//! # Invariants
//!
//! 1. **Single vote**: at most one `current_grant` exists; the vote is granted
//!    exactly when `current_grant` is `Some`.
//! 2. **No lost requests**: a displaced holder goes back into the queue, and a
//!    RELEASE only ever removes the holder's own request.
//! 3. **One inquiry**: at most one INQUIRE is outstanding per grant.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use coterie_types::{Message, MessageKind, ProcessId};
use tracing::trace;

use crate::error::ProtocolViolation;

/// A reply the voter wants sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoterReply {
    /// Recipient.
    pub to: ProcessId,
    /// GRANT, POSTPONED or INQUIRE.
    pub kind: MessageKind,
}

impl VoterReply {
    fn new(to: ProcessId, kind: MessageKind) -> Self {
        Self { to, kind }
    }
}

/// Per-process vote arbiter.
#[derive(Debug, Default)]
pub struct VoterState {
    /// REQUEST currently holding the vote.
    current_grant: Option<Message>,
    /// REQUESTs waiting for the vote, highest priority on top.
    pending: BinaryHeap<Reverse<Message>>,
    /// An INQUIRE to the current holder is outstanding.
    inquiring: bool,
}

impl VoterState {
    /// A free vote with an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the vote is currently held by some requester.
    pub fn is_granted(&self) -> bool {
        self.current_grant.is_some()
    }

    /// The request holding the vote.
    pub fn current_grant(&self) -> Option<&Message> {
        self.current_grant.as_ref()
    }

    /// Whether an INQUIRE to the holder is outstanding.
    pub fn is_inquiring(&self) -> bool {
        self.inquiring
    }

    /// Number of queued requests.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Queued requests in priority order.
    pub fn pending(&self) -> Vec<Message> {
        let mut queued: Vec<Message> = self.pending.iter().map(|Reverse(m)| *m).collect();
        queued.sort();
        queued
    }

    /// Handle a REQUEST.
    ///
    /// A free vote is granted at once. Otherwise the request is queued and the
    /// requester is told POSTPONED unless it now outranks both the holder and
    /// every other queued request, in which case the holder is inquired (once).
    pub fn on_request(&mut self, request: Message) -> Result<Option<VoterReply>, ProtocolViolation> {
        if self.current_grant == Some(request)
            || self.pending.iter().any(|Reverse(m)| *m == request)
        {
            return Err(ProtocolViolation::DuplicateRequest { request });
        }

        let Some(holder) = self.current_grant else {
            self.current_grant = Some(request);
            return Ok(Some(VoterReply::new(request.origin, MessageKind::Grant)));
        };

        self.pending.push(Reverse(request));
        let top_outranks = self
            .pending
            .peek()
            .is_some_and(|Reverse(top)| top.precedes(&request));

        if holder.precedes(&request) || top_outranks {
            trace!(%request, %holder, queued = self.pending.len(), "request postponed");
            return Ok(Some(VoterReply::new(request.origin, MessageKind::Postponed)));
        }

        if self.inquiring {
            return Ok(None);
        }
        self.inquiring = true;
        Ok(Some(VoterReply::new(holder.origin, MessageKind::Inquire)))
    }

    /// Handle a RELINQUISH from the holder: requeue it and grant the top request.
    ///
    /// The holder may give the vote back even if this voter's INQUIRE has
    /// already been cleared; if nothing outranks it, it is granted again.
    pub fn on_relinquish(&mut self, from: ProcessId) -> Result<VoterReply, ProtocolViolation> {
        let holder = self.current_grant.map(|m| m.origin);
        let Some(current) = self.current_grant.filter(|m| m.origin == from) else {
            return Err(ProtocolViolation::RelinquishFromNonHolder { from, holder });
        };
        if !self.inquiring {
            trace!(%from, "relinquish without an outstanding inquire");
        }

        self.inquiring = false;
        self.current_grant = None;
        self.pending.push(Reverse(current));

        // The queue holds at least `current`, so a grant always follows.
        match self.grant_next() {
            Some(reply) => Ok(reply),
            None => Err(ProtocolViolation::RelinquishFromNonHolder { from, holder }),
        }
    }

    /// Handle a RELEASE from the holder: free the vote and grant the next request.
    pub fn on_release(&mut self, from: ProcessId) -> Result<Option<VoterReply>, ProtocolViolation> {
        let Some(current) = self.current_grant else {
            return Err(ProtocolViolation::ReleaseWhileFree { from });
        };
        if current.origin != from {
            return Err(ProtocolViolation::ReleaseFromNonHolder {
                from,
                holder: current.origin,
            });
        }

        self.current_grant = None;
        self.inquiring = false;
        Ok(self.grant_next())
    }

    fn grant_next(&mut self) -> Option<VoterReply> {
        let Reverse(next) = self.pending.pop()?;
        self.current_grant = Some(next);
        Some(VoterReply::new(next.origin, MessageKind::Grant))
    }
}
