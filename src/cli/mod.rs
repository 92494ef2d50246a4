//! Command-line interface.
//!
//! Operator tooling for the map state machine: configuration checks,
//! snapshot inspection, and deterministic trace replay.

pub mod commands;

use clap::{Parser, Subcommand};

/// Keystone - replicated versioned transactional key-value map.
#[derive(Parser, Debug)]
#[command(name = "keystone")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Configuration operations.
    Config(commands::ConfigArgs),
    /// Snapshot operations.
    Snapshot(commands::SnapshotArgs),
    /// Replay a recorded operation trace.
    Replay(commands::ReplayArgs),
}
