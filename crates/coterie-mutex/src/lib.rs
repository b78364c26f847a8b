//! Quorum-voting distributed mutual exclusion (Maekawa).
//!
//! Every process plays two roles at once:
//!
//! - a **voter** ([`VoterState`]) that owns exactly one vote and lends it to
//!   one requester at a time, queueing the rest by `(timestamp, origin)`;
//! - a **requester** ([`RequesterState`]) that asks every member of its
//!   request set for its vote and enters the critical section once all of
//!   them have granted it.
//!
//! Because any two request sets intersect, two processes can never hold a
//! full quorum at the same time. Deadlocks between overlapping requests are
//! broken by the INQUIRE / RELINQUISH handshake: a voter whose vote is held
//! by a lower-priority request asks the holder to give it back, and the holder
//! does so once it learns (through POSTPONED) that it cannot win anyway.
//!
//! [`ProcessState`] is the synchronous transition layer; [`MutexController`]
//! runs it as an actor over any [`coterie_net::Transport`].

pub mod controller;
pub mod critical;
mod error;
pub mod process;
pub mod requester;
pub mod router;
pub mod status;
pub mod voter;

pub use controller::{MutexConfig, MutexController};
pub use critical::{CriticalSection, FnSection, NoopCriticalSection};
pub use error::{MutexError, ProtocolViolation};
pub use process::{Action, ProcessState};
pub use requester::{InquiryDecision, RequesterPhase, RequesterProgress, RequesterState};
pub use router::{Envelope, Outbox, Role, route};
pub use status::StatusSnapshot;
pub use voter::{VoterReply, VoterState};
