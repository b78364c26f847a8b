//! Async driver for one process.
//!
//! A [`MutexController`] owns a [`ProcessState`] inside a single actor task
//! fed by one command queue, so messages for a process are handled strictly
//! one at a time. Work that must not hold up that queue runs on side tasks
//! and re-enters the actor as a command:
//!
//! - outbound sends go through the [`Outbox`];
//! - the critical section body runs on its own task and reports back with
//!   `CriticalSectionDone`;
//! - an INQUIRE that cannot be answered yet parks a waiter on the requester
//!   progress channel, which posts `InquiryResolved` once the request is
//!   postponed, wins, or ends. The actor then re-decides against the state
//!   it holds at that moment.

use std::sync::Arc;
use std::time::Duration;

use coterie_net::{Inbox, Transport};
use coterie_types::{Message, ProcessId, RequestSetTable};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::critical::CriticalSection;
use crate::error::MutexError;
use crate::process::{Action, ProcessState};
use crate::requester::RequesterProgress;
use crate::router::{Envelope, Outbox};
use crate::status::StatusSnapshot;

/// Configuration for a [`MutexController`].
#[derive(Debug, Clone)]
pub struct MutexConfig {
    /// Identity of the local process.
    pub process_id: ProcessId,
    /// Upper bound on how long an INQUIRE waits for the request to settle.
    /// `None` waits indefinitely. When it elapses the inquiry is dropped
    /// without a reply and the vote stays where it is.
    pub inquire_timeout: Option<Duration>,
    /// Maximum number of outbound sends in flight.
    pub max_inflight_sends: usize,
}

impl MutexConfig {
    /// Defaults for process `process_id`.
    pub fn new(process_id: ProcessId) -> Self {
        Self {
            process_id,
            inquire_timeout: None,
            max_inflight_sends: 64,
        }
    }

    /// A config suitable for tests.
    pub fn test_config(process_id: ProcessId) -> Self {
        Self {
            process_id,
            inquire_timeout: None,
            max_inflight_sends: 16,
        }
    }

    pub fn with_inquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.inquire_timeout = timeout;
        self
    }

    pub fn with_max_inflight_sends(mut self, max: usize) -> Self {
        self.max_inflight_sends = max;
        self
    }
}

/// Input to the process actor.
#[derive(Debug)]
enum Command {
    Deliver(Message),
    Request(oneshot::Sender<Result<u64, MutexError>>),
    CriticalSectionDone { epoch: u64 },
    InquiryResolved { voter: ProcessId, epoch: u64 },
    Status(oneshot::Sender<StatusSnapshot>),
}

/// Handle to a running process.
///
/// Register it with the network as the process's [`Inbox`]. The actor runs
/// until [`MutexController::shutdown`] is called or the handle is dropped.
pub struct MutexController {
    id: ProcessId,
    commands: mpsc::UnboundedSender<Command>,
    progress: watch::Receiver<RequesterProgress>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MutexController {
    /// Start the actor for `config.process_id`.
    ///
    /// Fails if the process has no valid request set in `table`.
    pub fn spawn(
        config: MutexConfig,
        table: &RequestSetTable,
        transport: Arc<dyn Transport>,
        section: Arc<dyn CriticalSection>,
    ) -> Result<Arc<Self>, MutexError> {
        table.validate()?;
        let state = ProcessState::new(config.process_id, table)?;
        let id = state.id();

        let (commands, rx) = mpsc::unbounded_channel();
        let (progress_tx, progress) = watch::channel(state.progress());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let actor = ProcessActor {
            outbox: Outbox::new(id, transport, config.max_inflight_sends),
            config,
            state,
            loopback: commands.clone(),
            section,
            progress_tx,
            waiting: None,
        };

        info!(process = %id, request_set = ?actor.state.request_set(), "mutex controller started");
        let task = tokio::spawn(actor.run(rx, shutdown_rx));

        Ok(Arc::new(Self {
            id,
            commands,
            progress,
            shutdown_tx,
            task,
        }))
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Request the critical section and wait until it has run and RELEASE
    /// has been sent. Returns the request epoch.
    pub async fn request_critical_section(&self) -> Result<u64, MutexError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Request(tx))?;
        rx.await.map_err(|_| MutexError::Stopped)?
    }

    /// Snapshot of voter and requester state.
    pub async fn status(&self) -> Result<StatusSnapshot, MutexError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Status(tx))?;
        rx.await.map_err(|_| MutexError::Stopped)
    }

    /// Hand an inbound message to the actor.
    pub fn dispatch(&self, msg: Message) -> Result<(), MutexError> {
        self.send(Command::Deliver(msg))
    }

    /// Latest requester progress.
    pub fn progress(&self) -> RequesterProgress {
        *self.progress.borrow()
    }

    /// Stop the actor. Pending requests fail with [`MutexError::Stopped`].
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Check whether the actor task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    fn send(&self, cmd: Command) -> Result<(), MutexError> {
        self.commands.send(cmd).map_err(|_| MutexError::Stopped)
    }
}

impl Inbox for MutexController {
    fn deliver(&self, msg: Message) {
        if self.dispatch(msg).is_err() {
            trace!(process = %self.id, %msg, "controller stopped, message dropped");
        }
    }
}

impl Drop for MutexController {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// The task that owns a process's state.
struct ProcessActor {
    config: MutexConfig,
    state: ProcessState,
    outbox: Outbox,
    loopback: mpsc::UnboundedSender<Command>,
    section: Arc<dyn CriticalSection>,
    progress_tx: watch::Sender<RequesterProgress>,
    /// Caller waiting for the current request to complete.
    waiting: Option<(u64, oneshot::Sender<Result<u64, MutexError>>)>,
}

impl ProcessActor {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Command>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    self.on_command(cmd);
                    self.progress_tx.send_replace(self.state.progress());
                }
                _ = shutdown_rx.changed() => {
                    break;
                }
            }
        }

        if let Some((_, reply)) = self.waiting.take() {
            let _ = reply.send(Err(MutexError::Stopped));
        }
        info!(process = %self.state.id(), "mutex controller stopped");
    }

    fn on_command(&mut self, cmd: Command) {
        let id = self.state.id();
        match cmd {
            Command::Deliver(msg) => {
                debug!(process = %id, from = %msg.origin, %msg, "received");
                match self.state.handle(msg) {
                    Ok(actions) => self.perform(actions),
                    Err(violation) => {
                        warn!(process = %id, %msg, %violation, "protocol violation, message dropped");
                    }
                }
            }
            Command::Request(reply) => match self.state.request_critical_section() {
                Ok((epoch, actions)) => {
                    info!(process = %id, epoch, ts = self.state.clock(), "requesting critical section");
                    self.waiting = Some((epoch, reply));
                    self.perform(actions);
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::CriticalSectionDone { epoch } => {
                match self.state.finish_critical_section(epoch) {
                    Ok(actions) => {
                        info!(process = %id, epoch, "left critical section");
                        self.perform(actions);
                    }
                    Err(violation) => {
                        warn!(process = %id, %violation, "critical section completion ignored");
                        return;
                    }
                }
                if let Some((waiting_epoch, reply)) = self.waiting.take() {
                    if waiting_epoch == epoch {
                        let _ = reply.send(Ok(epoch));
                    } else {
                        self.waiting = Some((waiting_epoch, reply));
                    }
                }
            }
            Command::InquiryResolved { voter, epoch } => {
                let actions = self.state.resolve_inquiry(voter, epoch);
                if actions.is_empty() {
                    debug!(process = %id, %voter, epoch, "inquiry settled without relinquish");
                }
                self.perform(actions);
            }
            Command::Status(reply) => {
                let _ = reply.send(self.state.status());
            }
        }
    }

    fn perform(&mut self, actions: Vec<Action>) {
        let id = self.state.id();
        for action in actions {
            match action {
                Action::Send(envelope) => self.send(envelope),
                Action::EnterCriticalSection { epoch } => {
                    info!(process = %id, epoch, "entering critical section");
                    let section = Arc::clone(&self.section);
                    let done = self.loopback.clone();
                    tokio::spawn(async move {
                        section.run(id, epoch).await;
                        let _ = done.send(Command::CriticalSectionDone { epoch });
                    });
                }
                Action::AwaitInquiry { voter, epoch } => {
                    debug!(process = %id, %voter, epoch, "deferring inquire");
                    self.park_inquiry(voter, epoch);
                }
            }
        }
    }

    fn send(&self, envelope: Envelope) {
        if envelope.to == self.state.id() {
            trace!(process = %envelope.to, message = %envelope.message, "loopback");
            let _ = self.loopback.send(Command::Deliver(envelope.message));
        } else {
            self.outbox.dispatch(envelope);
        }
    }

    /// Wait off the actor until the request of `epoch` settles, then hand the
    /// inquiry back for a decision.
    fn park_inquiry(&self, voter: ProcessId, epoch: u64) {
        let id = self.state.id();
        let mut progress = self.progress_tx.subscribe();
        let resolved = self.loopback.clone();
        let timeout = self.config.inquire_timeout;

        tokio::spawn(async move {
            let settled = match timeout {
                Some(limit) => {
                    match tokio::time::timeout(limit, inquiry_settled(&mut progress, epoch)).await {
                        Ok(settled) => settled,
                        Err(_) => {
                            warn!(process = %id, %voter, epoch, ?limit, "inquire wait timed out, no reply sent");
                            false
                        }
                    }
                }
                None => inquiry_settled(&mut progress, epoch).await,
            };
            if settled {
                let _ = resolved.send(Command::InquiryResolved { voter, epoch });
            }
        });
    }
}

async fn inquiry_settled(progress: &mut watch::Receiver<RequesterProgress>, epoch: u64) -> bool {
    progress.wait_for(|p| p.settles_inquiry(epoch)).await.is_ok()
}
