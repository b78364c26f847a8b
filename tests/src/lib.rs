//! Shared test harness for coterie integration tests.
//!
//! Two drivers:
//!
//! - [`Simulation`] runs a whole group of [`ProcessState`]s on one thread.
//!   A seeded RNG picks which message is delivered next and how long each
//!   critical section lasts, so every schedule is reproducible from its seed.
//!   It checks mutual exclusion after every step.
//! - [`LiveCluster`] runs real [`MutexController`]s over a [`LocalNetwork`]
//!   with an [`ExclusiveSection`] that detects overlapping entries.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use coterie_mutex::{
    Action, CriticalSection, MutexConfig, MutexController, ProcessState, ProtocolViolation,
    RequesterPhase,
};
use coterie_net::{LatencyConfig, LocalNetwork};
use coterie_types::{Message, ProcessId, RequestSetTable};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

/// Shorthand for a process id.
pub fn p(id: u32) -> ProcessId {
    ProcessId::new(id)
}

// =========================================================================
// Deterministic simulation
// =========================================================================

/// How in-flight messages are picked for delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Random link, oldest message on that link first.
    FifoLinks,
    /// Any in-flight message, in any order.
    Shuffled,
}

/// One recorded event of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Requested(ProcessId, u64),
    Delivered { to: ProcessId, message: Message },
    Entered(ProcessId, u64),
    Left(ProcessId, u64),
}

/// An INQUIRE a process could not answer yet.
#[derive(Debug, Clone, Copy)]
struct Parked {
    process: ProcessId,
    voter: ProcessId,
    epoch: u64,
}

/// A whole process group driven by a seeded scheduler.
pub struct Simulation {
    procs: BTreeMap<ProcessId, ProcessState>,
    /// (from, to) -> messages in send order.
    links: BTreeMap<(ProcessId, ProcessId), VecDeque<Message>>,
    parked: Vec<Parked>,
    occupant: Option<(ProcessId, u64)>,
    hold_steps: u32,
    max_hold_steps: u32,
    delivery: Delivery,
    rng: StdRng,
    events: Vec<Event>,
    violations: Vec<(ProcessId, ProtocolViolation)>,
}

impl Simulation {
    /// Build a simulation over `table` with a fixed seed.
    pub fn new(table: &RequestSetTable, seed: u64) -> Self {
        let procs = table
            .processes()
            .map(|id| (id, ProcessState::new(id, table).expect("process in table")))
            .collect();
        Self {
            procs,
            links: BTreeMap::new(),
            parked: Vec::new(),
            occupant: None,
            hold_steps: 0,
            max_hold_steps: 4,
            delivery: Delivery::FifoLinks,
            rng: StdRng::seed_from_u64(seed),
            events: Vec::new(),
            violations: Vec::new(),
        }
    }

    /// Change the delivery discipline.
    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }

    /// Upper bound on the steps a critical section stays occupied.
    pub fn with_max_hold_steps(mut self, steps: u32) -> Self {
        self.max_hold_steps = steps;
        self
    }

    pub fn process(&self, id: ProcessId) -> &ProcessState {
        &self.procs[&id]
    }

    pub fn process_mut(&mut self, id: ProcessId) -> &mut ProcessState {
        self.procs.get_mut(&id).expect("unknown process")
    }

    pub fn processes(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.procs.keys().copied()
    }

    /// Let `id` request the critical section. Returns `false` if it already
    /// has a request outstanding.
    pub fn request(&mut self, id: ProcessId) -> bool {
        match self.process_mut(id).request_critical_section() {
            Ok((epoch, actions)) => {
                self.events.push(Event::Requested(id, epoch));
                self.absorb(id, actions);
                true
            }
            Err(_) => false,
        }
    }

    /// Processes with no request outstanding.
    pub fn idle(&self) -> Vec<ProcessId> {
        self.procs
            .values()
            .filter(|s| s.requester().phase() == RequesterPhase::Idle)
            .map(|s| s.id())
            .collect()
    }

    /// Processes still collecting votes.
    pub fn waiting(&self) -> Vec<ProcessId> {
        self.procs
            .values()
            .filter(|s| s.requester().phase() == RequesterPhase::Requesting)
            .map(|s| s.id())
            .collect()
    }

    /// Messages not yet delivered.
    pub fn in_flight(&self) -> usize {
        self.links.values().map(VecDeque::len).sum()
    }

    /// Advance by one step. Returns `false` once nothing is left to do.
    pub fn step(&mut self) -> bool {
        self.resolve_parked();

        if let Some((id, epoch)) = self.occupant {
            if self.hold_steps == 0 || self.links.is_empty() {
                self.leave(id, epoch);
                return true;
            }
            self.hold_steps -= 1;
        }

        let Some((link, message)) = self.pick() else {
            return false;
        };
        self.events.push(Event::Delivered {
            to: link.1,
            message,
        });
        let state = self.process_mut(link.1);
        match state.handle(message) {
            Ok(actions) => self.absorb(link.1, actions),
            Err(violation) => {
                trace!(to = %link.1, %message, %violation, "violation");
                self.violations.push((link.1, violation));
            }
        }
        true
    }

    /// Step until quiet or `max_steps` is reached. Returns whether the
    /// group went quiet.
    pub fn run(&mut self, max_steps: usize) -> bool {
        for _ in 0..max_steps {
            if !self.step() {
                return true;
            }
        }
        false
    }

    /// Processes in the order they entered the critical section.
    pub fn entries(&self) -> Vec<ProcessId> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Entered(id, _) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Messages rejected by their receiver.
    pub fn violations(&self) -> &[(ProcessId, ProtocolViolation)] {
        &self.violations
    }

    /// Assert that the critical-section trace never overlaps.
    pub fn assert_exclusive(&self) {
        let mut inside: Option<(ProcessId, u64)> = None;
        for event in &self.events {
            match *event {
                Event::Entered(id, epoch) => {
                    assert!(inside.is_none(), "{id} entered while {inside:?} was inside");
                    inside = Some((id, epoch));
                }
                Event::Left(id, epoch) => {
                    assert_eq!(inside, Some((id, epoch)), "unmatched exit of {id}");
                    inside = None;
                }
                _ => {}
            }
        }
    }

    /// Assert that every voter is free and nothing is queued.
    pub fn assert_all_votes_free(&self) {
        for state in self.procs.values() {
            let voter = state.voter();
            assert!(!voter.is_granted(), "{} still granted", state.id());
            assert_eq!(voter.pending_len(), 0, "{} still queues requests", state.id());
            assert!(!voter.is_inquiring(), "{} still inquiring", state.id());
        }
    }

    fn absorb(&mut self, id: ProcessId, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send(env) => self
                    .links
                    .entry((id, env.to))
                    .or_default()
                    .push_back(env.message),
                Action::EnterCriticalSection { epoch } => {
                    if let Some(other) = self.occupant {
                        panic!("{id} entered the critical section while {other:?} holds it");
                    }
                    self.occupant = Some((id, epoch));
                    self.hold_steps = self.rng.random_range(0..=self.max_hold_steps);
                    self.events.push(Event::Entered(id, epoch));
                }
                Action::AwaitInquiry { voter, epoch } => self.parked.push(Parked {
                    process: id,
                    voter,
                    epoch,
                }),
            }
        }
    }

    fn leave(&mut self, id: ProcessId, epoch: u64) {
        self.occupant = None;
        self.events.push(Event::Left(id, epoch));
        let actions = self
            .process_mut(id)
            .finish_critical_section(epoch)
            .expect("occupant is in its critical section");
        self.absorb(id, actions);
    }

    /// Hand every settled inquiry back to its process, like the controller's
    /// progress waiters do.
    fn resolve_parked(&mut self) {
        let parked = std::mem::take(&mut self.parked);
        for entry in parked {
            let settled = self.procs[&entry.process]
                .progress()
                .settles_inquiry(entry.epoch);
            if settled {
                let actions = self
                    .process_mut(entry.process)
                    .resolve_inquiry(entry.voter, entry.epoch);
                self.absorb(entry.process, actions);
            } else {
                self.parked.push(entry);
            }
        }
    }

    fn pick(&mut self) -> Option<((ProcessId, ProcessId), Message)> {
        if self.links.is_empty() {
            return None;
        }
        let (link, index) = match self.delivery {
            Delivery::FifoLinks => {
                let i = self.rng.random_range(0..self.links.len());
                (*self.links.keys().nth(i)?, 0)
            }
            Delivery::Shuffled => {
                let total = self.in_flight();
                let mut i = self.rng.random_range(0..total);
                let mut chosen = None;
                for (link, queue) in &self.links {
                    if i < queue.len() {
                        chosen = Some((*link, i));
                        break;
                    }
                    i -= queue.len();
                }
                chosen?
            }
        };
        let queue = self.links.get_mut(&link)?;
        let message = queue.remove(index)?;
        if queue.is_empty() {
            self.links.remove(&link);
        }
        Some((link, message))
    }
}

// =========================================================================
// Live cluster
// =========================================================================

/// Critical section that sleeps and counts overlapping entries.
pub struct ExclusiveSection {
    hold: Duration,
    inside: AtomicUsize,
    overlaps: AtomicUsize,
    order: std::sync::Mutex<Vec<ProcessId>>,
}

impl ExclusiveSection {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            inside: AtomicUsize::new(0),
            overlaps: AtomicUsize::new(0),
            order: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Number of entries that found the section already occupied.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    /// Processes in entry order.
    pub fn order(&self) -> Vec<ProcessId> {
        self.order.lock().map(|o| o.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CriticalSection for ExclusiveSection {
    async fn run(&self, process: ProcessId, _epoch: u64) {
        if self.inside.fetch_add(1, Ordering::SeqCst) != 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        if let Ok(mut order) = self.order.lock() {
            order.push(process);
        }
        tokio::time::sleep(self.hold).await;
        self.inside.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Controllers for every process of a table, wired over one [`LocalNetwork`].
pub struct LiveCluster {
    pub net: Arc<LocalNetwork>,
    pub section: Arc<ExclusiveSection>,
    controllers: BTreeMap<ProcessId, Arc<MutexController>>,
}

impl LiveCluster {
    /// Start controllers for the well-known or grid coterie of `n` processes.
    pub async fn start(n: usize, latency: LatencyConfig, hold: Duration) -> Self {
        let table = RequestSetTable::for_size(n).expect("coterie for n");
        Self::with_table(&table, latency, hold).await
    }

    pub async fn with_table(table: &RequestSetTable, latency: LatencyConfig, hold: Duration) -> Self {
        let net = LocalNetwork::new(latency);
        let section = Arc::new(ExclusiveSection::new(hold));
        let mut controllers = BTreeMap::new();
        for id in table.processes() {
            let ctrl = MutexController::spawn(
                MutexConfig::test_config(id),
                table,
                net.clone(),
                section.clone(),
            )
            .expect("controller starts");
            net.register(id, ctrl.clone()).await;
            controllers.insert(id, ctrl);
        }
        Self {
            net,
            section,
            controllers,
        }
    }

    pub fn controller(&self, id: u32) -> Arc<MutexController> {
        Arc::clone(&self.controllers[&p(id)])
    }

    pub fn ids(&self) -> Vec<ProcessId> {
        self.controllers.keys().copied().collect()
    }

    /// Every process requests `rounds` times in a row, all concurrently.
    /// Returns the completed requests.
    pub async fn contend(&self, rounds: usize) -> usize {
        let mut handles = Vec::new();
        for ctrl in self.controllers.values() {
            let ctrl = Arc::clone(ctrl);
            handles.push(tokio::spawn(async move {
                let mut done = 0;
                for _ in 0..rounds {
                    if ctrl.request_critical_section().await.is_ok() {
                        done += 1;
                    }
                }
                done
            }));
        }
        let mut total = 0;
        for h in handles {
            total += h.await.unwrap_or(0);
        }
        total
    }

    pub fn shutdown(&self) {
        for ctrl in self.controllers.values() {
            ctrl.shutdown();
        }
    }
}
