//! `coteried`: the coterie daemon.
//!
//! Runs processes of the quorum-voting mutual-exclusion protocol and lets an
//! operator drive them from the console.
//!
//! # Usage
//!
//! ```text
//! coteried local                       # 3 processes in this runtime
//! coteried local -n 7                  # 7 processes on the Fano-plane coterie
//! coteried start -c coterie.toml       # one process over TCP, peers from config
//! coteried start -c coterie.toml -i 2  # same config, process 2
//! coteried check -n 5                  # print and validate a coterie
//! ```

mod config;
mod console;
mod section;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coterie_mutex::{CriticalSection, MutexController};
use coterie_net::{LocalNetwork, TcpTransport};
use coterie_types::{ProcessId, RequestSetTable};
use tokio::net::TcpListener;
use tracing::{info, warn};

use config::CliConfig;
use section::SleepSection;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "coteried",
    version,
    about = "Quorum-voting distributed mutual exclusion daemon"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a whole group of processes inside this daemon.
    Local {
        /// Number of processes.
        #[arg(short = 'n', long)]
        processes: Option<usize>,
    },

    /// Run a single process that talks to its peers over TCP.
    Start {
        /// Id of this process.
        #[arg(short, long, env = "COTERIE_PROCESS_ID")]
        id: Option<u32>,

        /// Override the listen address (e.g. "127.0.0.1:4700").
        #[arg(short = 'l', long)]
        listen_addr: Option<String>,
    },

    /// Validate and print the request-set table.
    Check {
        /// Number of processes (defaults to the configured peers or count).
        #[arg(short = 'n', long)]
        processes: Option<usize>,
    },
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    setup_tracing(&config.log.level);

    match cli.command {
        Commands::Local { processes } => {
            if let Some(n) = processes {
                config.process.count = n;
            }
            cmd_local(config).await
        }
        Commands::Start { id, listen_addr } => {
            // CLI args override config file values.
            if let Some(id) = id {
                config.process.id = id;
            }
            if let Some(addr) = listen_addr {
                config.process.listen_addr = Some(addr);
            }
            cmd_start(config).await
        }
        Commands::Check { processes } => cmd_check(&config, processes),
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Build the table for `n` processes, warning about non-optimal coteries.
fn load_table(config: &CliConfig, n: usize) -> Result<RequestSetTable> {
    let table = config.request_set_table(n)?;
    if !config.has_explicit_request_sets() && !RequestSetTable::has_well_known(n) {
        warn!(processes = n, "no optimal coterie known, using grid request sets");
    }
    Ok(table)
}

// -----------------------------------------------------------------------
// coteried local
// -----------------------------------------------------------------------

async fn cmd_local(config: CliConfig) -> Result<()> {
    let n = config.process.count;
    let table = load_table(&config, n)?;
    let latency = config.latency();
    info!(processes = table.len(), ?latency, "starting local group");

    let net = LocalNetwork::new(latency);
    let section: Arc<dyn CriticalSection> =
        Arc::new(SleepSection::new(config.critical_section_range()));

    let mut controllers = BTreeMap::new();
    for id in table.processes() {
        let ctrl = MutexController::spawn(
            config.mutex_config(id),
            &table,
            net.clone(),
            Arc::clone(&section),
        )
        .with_context(|| format!("failed to start {id}"))?;
        net.register(id, ctrl.clone()).await;
        controllers.insert(id, ctrl);
    }

    console::run(&controllers).await?;

    for ctrl in controllers.values() {
        ctrl.shutdown();
    }
    info!(
        delivered = net.delivered_count(),
        dropped = net.dropped_count(),
        "local group stopped"
    );
    Ok(())
}

// -----------------------------------------------------------------------
// coteried start
// -----------------------------------------------------------------------

async fn cmd_start(config: CliConfig) -> Result<()> {
    let id = ProcessId::new(config.process.id);
    let peers = config.peer_addresses()?;
    let n = if peers.is_empty() {
        config.process.count
    } else {
        peers.len()
    };
    let table = load_table(&config, n)?;
    let listen_addr = config.listen_addr()?;

    for member in table.request_set(id)? {
        if *member != id && !peers.contains_key(member) {
            anyhow::bail!("request-set member {member} of {id} has no [peers] address");
        }
    }

    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    info!(process = %id, %listen_addr, peers = peers.len(), "listening");

    let transport = Arc::new(TcpTransport::new(id, peers));
    let section: Arc<dyn CriticalSection> =
        Arc::new(SleepSection::new(config.critical_section_range()));
    let ctrl = MutexController::spawn(config.mutex_config(id), &table, transport, section)
        .with_context(|| format!("failed to start {id}"))?;
    let server = TcpTransport::serve(listener, ctrl.clone());

    let controllers = BTreeMap::from([(id, Arc::clone(&ctrl))]);
    console::run(&controllers).await?;

    server.abort();
    ctrl.shutdown();
    info!(process = %id, "stopped");
    Ok(())
}

// -----------------------------------------------------------------------
// coteried check
// -----------------------------------------------------------------------

fn cmd_check(config: &CliConfig, processes: Option<usize>) -> Result<()> {
    let n = processes.unwrap_or_else(|| {
        if config.peers.is_empty() {
            config.process.count
        } else {
            config.peers.len()
        }
    });
    let table = load_table(config, n)?;

    println!("Request sets ({} processes):", table.len());
    for (id, members) in table.iter() {
        let members: Vec<String> = members.iter().map(ToString::to_string).collect();
        println!("  {id}: {{{}}}", members.join(", "));
    }
    println!("All request sets contain their owner and pairwise intersect.");
    Ok(())
}
