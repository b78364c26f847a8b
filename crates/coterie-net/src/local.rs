//! In-process network between inboxes.
//!
//! [`LocalNetwork`] routes messages between processes living in the same
//! runtime. Each send may be delayed by a random latency drawn from a
//! [`LatencyConfig`]; since callers dispatch sends concurrently, the latency
//! is also what reorders messages. Processes can be marked down to simulate
//! unreachable peers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use coterie_types::{Message, ProcessId};
use rand::Rng;
use tokio::sync::RwLock;
use tracing::trace;

use crate::error::NetError;
use crate::{Inbox, Transport};

/// Random per-message delivery delay, uniformly drawn from `min..=max`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyConfig {
    /// Shortest delay.
    pub min: Duration,
    /// Longest delay.
    pub max: Duration,
}

impl LatencyConfig {
    /// Deliver immediately.
    pub fn none() -> Self {
        Self::default()
    }

    /// Uniform delay between `min` and `max` (swapped if given in reverse).
    pub fn between(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// Draw one delay.
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min = self.min.as_micros() as u64;
        let max = self.max.as_micros() as u64;
        Duration::from_micros(rand::rng().random_range(min..=max))
    }
}

/// In-process message router with latency and failure injection.
pub struct LocalNetwork {
    inboxes: RwLock<HashMap<ProcessId, Arc<dyn Inbox>>>,
    down: RwLock<HashSet<ProcessId>>,
    latency: LatencyConfig,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl LocalNetwork {
    /// Create an empty network.
    pub fn new(latency: LatencyConfig) -> Arc<Self> {
        Arc::new(Self {
            inboxes: RwLock::new(HashMap::new()),
            down: RwLock::new(HashSet::new()),
            latency,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    /// Register the inbox of process `id`, replacing any previous one.
    pub async fn register(&self, id: ProcessId, inbox: Arc<dyn Inbox>) {
        self.inboxes.write().await.insert(id, inbox);
    }

    /// Mark process `id` unreachable (`true`) or reachable again (`false`).
    pub async fn set_down(&self, id: ProcessId, down: bool) {
        let mut set = self.down.write().await;
        if down {
            set.insert(id);
        } else {
            set.remove(&id);
        }
    }

    /// Configured latency.
    pub fn latency(&self) -> LatencyConfig {
        self.latency
    }

    /// Number of messages handed to an inbox so far.
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Number of sends rejected because the target was down or unknown.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Transport for LocalNetwork {
    async fn send_to(&self, target: ProcessId, msg: &Message) -> Result<(), NetError> {
        if self.down.read().await.contains(&target) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(NetError::Unreachable(target));
        }

        let inbox = self.inboxes.read().await.get(&target).cloned();
        let Some(inbox) = inbox else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(NetError::UnknownPeer(target));
        };

        let delay = self.latency.sample();
        if !delay.is_zero() {
            trace!(%target, %msg, delay_us = delay.as_micros() as u64, "delaying delivery");
            tokio::time::sleep(delay).await;
        }

        inbox.deliver(*msg);
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
