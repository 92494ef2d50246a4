//! Keystone - unified CLI entrypoint.
//!
//! Usage:
//!   keystone config validate --config config/keystone.toml
//!   keystone config show [--config PATH]
//!   keystone config generate [--output PATH]
//!   keystone snapshot inspect <image>
//!   keystone replay <trace.json> [--snapshot-out PATH]

use anyhow::Result;
use clap::Parser;
use keystone::cli::{commands, Cli, Commands};
use keystone::core::config::Config;

/// Initialize the tracing subscriber if the telemetry feature is enabled.
#[cfg(feature = "telemetry")]
fn init_tracing(level: Option<&str>) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

#[cfg(not(feature = "telemetry"))]
fn init_tracing(_level: Option<&str>) {}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let config = match cli.config.as_deref() {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Config(args) => commands::run_config(args),
        Commands::Snapshot(args) => commands::run_snapshot(args),
        Commands::Replay(args) => commands::run_replay(args, config),
    }
}
