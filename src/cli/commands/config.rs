//! Config command implementation.

use crate::core::config::Config;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate a configuration file.
    Validate {
        /// Config file path.
        #[arg(default_value = "config/keystone.toml")]
        path: PathBuf,
    },
    /// Print the effective configuration with defaults applied.
    Show {
        /// Config file path.
        #[arg(default_value = "config/keystone.toml")]
        path: PathBuf,
    },
    /// Generate a configuration template.
    Generate {
        /// Output file path; stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Run the config command.
pub fn run_config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate { path } => {
            Config::from_file(&path)?;
            println!("✓ {:?} is valid", path);
            Ok(())
        }
        ConfigCommand::Show { path } => {
            let config = Config::from_file(&path)?;
            println!("{}", config.to_toml()?);
            Ok(())
        }
        ConfigCommand::Generate { output } => {
            let template = Config::default().to_toml()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, template)
                        .with_context(|| format!("failed to write {:?}", path))?;
                    println!("wrote {:?}", path);
                }
                None => print!("{}", template),
            }
            Ok(())
        }
    }
}
