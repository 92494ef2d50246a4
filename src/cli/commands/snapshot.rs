//! Snapshot command implementation.

use crate::codec::snapshot as snapshot_codec;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Snapshot operations.
#[derive(Args, Debug)]
pub struct SnapshotArgs {
    #[command(subcommand)]
    pub command: SnapshotCommand,
}

/// Snapshot subcommands.
#[derive(Subcommand, Debug)]
pub enum SnapshotCommand {
    /// Print a snapshot image's header and section counts.
    Inspect {
        /// Snapshot path.
        path: PathBuf,
    },
}

/// Run the snapshot command.
pub fn run_snapshot(args: SnapshotArgs) -> Result<()> {
    match args.command {
        SnapshotCommand::Inspect { path } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read snapshot file {:?}", path))?;
            let summary =
                snapshot_codec::summarize(&bytes).context("failed to parse snapshot")?;

            println!("snapshot        {:?}", path);
            println!("format version  {}", summary.format_version);
            println!("version counter {}", summary.version_counter);
            println!("last applied    {}", summary.last_applied);
            println!("logical time    {}ms", summary.now_ms);
            println!("entries         {}", summary.entries);
            println!("ttl nodes       {}", summary.ttl_nodes);
            println!("transactions    {}", summary.transactions);
            println!("listeners       {}", summary.listeners);
            Ok(())
        }
    }
}
