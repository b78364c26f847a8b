//! TOML configuration for the coterie daemon.
//!
//! Every section is optional. Without a config file the daemon runs three
//! local processes on the well-known coterie with the demo timing.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use coterie_mutex::MutexConfig;
use coterie_net::LatencyConfig;
use coterie_types::{ProcessId, RequestSetTable};
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Local process identity.
    pub process: ProcessSection,
    /// Process id -> socket address, for network mode.
    pub peers: BTreeMap<String, String>,
    /// Process id -> request set. Derived from the group size when empty.
    pub request_sets: BTreeMap<String, Vec<u32>>,
    /// Delays and bounds.
    pub timing: TimingSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[process]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProcessSection {
    /// Id of this process in network mode.
    pub id: u32,
    /// Address to accept peer connections on. Falls back to this process's
    /// `[peers]` entry.
    pub listen_addr: Option<String>,
    /// Number of processes started in local mode.
    pub count: usize,
}

impl Default for ProcessSection {
    fn default() -> Self {
        Self {
            id: 1,
            listen_addr: None,
            count: 3,
        }
    }
}

/// `[timing]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    /// Shortest artificial delay added to each local-mode send.
    pub send_delay_min_ms: u64,
    /// Longest artificial delay added to each local-mode send.
    pub send_delay_max_ms: u64,
    /// Shortest time the demo critical section takes.
    pub critical_section_min_ms: u64,
    /// Longest time the demo critical section takes.
    pub critical_section_max_ms: u64,
    /// Bound on the wait for an INQUIRE to settle. `0` waits indefinitely.
    pub inquire_timeout_ms: u64,
    /// Maximum outbound sends in flight per process.
    pub max_inflight_sends: usize,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            send_delay_min_ms: 0,
            send_delay_max_ms: 0,
            critical_section_min_ms: 500,
            critical_section_max_ms: 5000,
            inquire_timeout_ms: 0,
            max_inflight_sends: 64,
        }
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read {}", p.display()))?;
                let config: CliConfig = toml::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// The request-set table for a group of `n` processes.
    ///
    /// Uses `[request_sets]` when present, otherwise the well-known coterie
    /// for `n` or a grid coterie.
    pub fn request_set_table(&self, n: usize) -> anyhow::Result<RequestSetTable> {
        if self.request_sets.is_empty() {
            return RequestSetTable::for_size(n)
                .with_context(|| format!("no coterie for {n} processes"));
        }

        let mut entries = Vec::with_capacity(self.request_sets.len());
        for (id, members) in &self.request_sets {
            entries.push((parse_id(id)?.get(), members.clone()));
        }
        RequestSetTable::from_raw(entries).context("invalid [request_sets]")
    }

    /// Whether the table comes from `[request_sets]`.
    pub fn has_explicit_request_sets(&self) -> bool {
        !self.request_sets.is_empty()
    }

    /// Parsed `[peers]` address book.
    pub fn peer_addresses(&self) -> anyhow::Result<HashMap<ProcessId, SocketAddr>> {
        self.peers
            .iter()
            .map(|(id, addr)| {
                let id = parse_id(id)?;
                let addr: SocketAddr = addr
                    .parse()
                    .with_context(|| format!("invalid address for {id}: {addr}"))?;
                Ok((id, addr))
            })
            .collect()
    }

    /// Address this process listens on in network mode.
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        let id = ProcessId::new(self.process.id);
        match &self.process.listen_addr {
            Some(addr) => addr
                .parse()
                .with_context(|| format!("invalid listen_addr {addr}")),
            None => match self.peer_addresses()?.get(&id) {
                Some(addr) => Ok(*addr),
                None => bail!("no listen_addr and no [peers] entry for {id}"),
            },
        }
    }

    /// Per-send latency for local mode.
    pub fn latency(&self) -> LatencyConfig {
        LatencyConfig::between(
            Duration::from_millis(self.timing.send_delay_min_ms),
            Duration::from_millis(self.timing.send_delay_max_ms),
        )
    }

    /// Bounds of the demo critical section.
    pub fn critical_section_range(&self) -> (Duration, Duration) {
        let min = self.timing.critical_section_min_ms;
        let max = self.timing.critical_section_max_ms.max(min);
        (Duration::from_millis(min), Duration::from_millis(max))
    }

    pub fn inquire_timeout(&self) -> Option<Duration> {
        match self.timing.inquire_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Controller configuration for process `id`.
    pub fn mutex_config(&self, id: ProcessId) -> MutexConfig {
        MutexConfig::new(id)
            .with_inquire_timeout(self.inquire_timeout())
            .with_max_inflight_sends(self.timing.max_inflight_sends)
    }
}

fn parse_id(s: &str) -> anyhow::Result<ProcessId> {
    s.parse()
        .with_context(|| format!("invalid process id {s:?}"))
}
