//! Replay command implementation.
//!
//! Feeds a recorded operation trace through a fresh state machine and
//! prints each response. Because application is deterministic, replaying
//! the same trace twice produces identical output and identical final
//! snapshots, which makes traces useful both as debugging artifacts and
//! as regression fixtures.

use crate::codec::snapshot as snapshot_codec;
use crate::core::config::Config;
use crate::core::time::LogicalTime;
use crate::map::ops::{Operation, OperationKind};
use crate::map::service::{CommandContext, MapService, QueryContext};
use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Replay a recorded operation trace.
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Trace file (JSON array of steps).
    pub trace: PathBuf,

    /// Write the final state as a snapshot image.
    #[arg(long)]
    pub snapshot_out: Option<PathBuf>,
}

/// One step of a trace file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    /// Logical timestamp of the step, in milliseconds.
    #[serde(default)]
    pub at_ms: u64,

    /// Issuing session.
    #[serde(default = "default_session")]
    pub session: u64,

    /// The operation to apply or serve.
    pub op: Operation,
}

fn default_session() -> u64 {
    1
}

/// Run the replay command.
pub fn run_replay(args: ReplayArgs, config: Config) -> Result<()> {
    let content = std::fs::read_to_string(&args.trace)
        .with_context(|| format!("failed to read trace file {:?}", args.trace))?;
    let steps: Vec<TraceStep> =
        serde_json::from_str(&content).context("failed to parse trace file")?;

    let mut service = MapService::new(config);
    let mut index = 0u64;

    for (i, step) in steps.into_iter().enumerate() {
        let response = match step.op.kind() {
            OperationKind::Command => {
                index += 1;
                let ctx = CommandContext {
                    index,
                    timestamp: LogicalTime::new(step.at_ms),
                    session: step.session,
                    sequence: i as u64 + 1,
                };
                service.apply(&ctx, step.op.clone())
            }
            OperationKind::Query => {
                let ctx = QueryContext::linearizable(step.session);
                service.query(&ctx, step.op.clone())
            }
        };
        println!("#{:<4} {:<16} {:?}", i + 1, step.op.name(), response);
    }

    let stats = service.stats();
    println!(
        "applied {} commands; {} entries, {} ttl nodes, {} in-flight transactions",
        stats.last_applied, stats.store.entries, stats.ttl.scheduled, stats.transactions.prepared
    );

    if let Some(path) = args.snapshot_out {
        snapshot_codec::write_snapshot_file(&service.to_snapshot(), &path)?;
        println!("wrote snapshot {:?}", path);
    }

    Ok(())
}
