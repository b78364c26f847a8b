//! Interactive console driving the local processes.
//!
//! ```text
//! <id>              process <id> requests the critical section
//! test1             processes 1 and 2 request at the same time
//! status <id|all>   print voter and requester state
//! exit              stop all processes and quit
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, bail};
use coterie_mutex::MutexController;
use coterie_types::ProcessId;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// A parsed console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Let one process request the critical section.
    Request(ProcessId),
    /// Processes 1 and 2 request concurrently.
    Test1,
    /// Print one process's status, or every process's with `None`.
    Status(Option<ProcessId>),
    Help,
    Exit,
}

impl ConsoleCommand {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> anyhow::Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(first) = words.next() else {
            return Ok(None);
        };

        let cmd = match first {
            "exit" | "quit" => Self::Exit,
            "help" => Self::Help,
            "test1" => Self::Test1,
            "status" => match words.next() {
                None | Some("all") => Self::Status(None),
                Some(id) => Self::Status(Some(parse_process(id)?)),
            },
            id => Self::Request(parse_process(id)?),
        };
        if let Some(extra) = words.next() {
            bail!("unexpected argument {extra:?}");
        }
        Ok(Some(cmd))
    }
}

fn parse_process(s: &str) -> anyhow::Result<ProcessId> {
    s.parse()
        .with_context(|| format!("not a process id or command: {s:?}"))
}

/// Read commands from stdin until `exit` or end of input.
pub async fn run(controllers: &BTreeMap<ProcessId, Arc<MutexController>>) -> anyhow::Result<()> {
    println!("processes started, now accepting commands (type `help`)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let cmd = match ConsoleCommand::parse(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(e) => {
                println!("{e:#}");
                continue;
            }
        };

        match cmd {
            ConsoleCommand::Exit => break,
            ConsoleCommand::Help => print_help(),
            ConsoleCommand::Request(id) => request(controllers, id),
            ConsoleCommand::Test1 => {
                request(controllers, ProcessId::new(1));
                request(controllers, ProcessId::new(2));
            }
            ConsoleCommand::Status(Some(id)) => match controllers.get(&id) {
                Some(ctrl) => println!("{}", ctrl.status().await?),
                None => println!("{id} is not a local process"),
            },
            ConsoleCommand::Status(None) => {
                for ctrl in controllers.values() {
                    println!("{}", ctrl.status().await?);
                }
            }
        }
    }
    Ok(())
}

/// Start a critical-section request without waiting for it.
fn request(controllers: &BTreeMap<ProcessId, Arc<MutexController>>, id: ProcessId) {
    let Some(ctrl) = controllers.get(&id) else {
        println!("{id} is not a local process");
        return;
    };
    let ctrl = Arc::clone(ctrl);
    tokio::spawn(async move {
        match ctrl.request_critical_section().await {
            Ok(epoch) => info!(process = %id, epoch, "critical section completed"),
            Err(e) => warn!(process = %id, %e, "critical section request failed"),
        }
    });
}

fn print_help() {
    println!("  <id>              request the critical section for process <id>");
    println!("  test1             processes 1 and 2 request at the same time");
    println!("  status <id|all>   show process state");
    println!("  exit              quit");
}
