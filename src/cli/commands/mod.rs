//! CLI command implementations.

mod config;
mod replay;
mod snapshot;

pub use config::{run_config, ConfigArgs};
pub use replay::{run_replay, ReplayArgs, TraceStep};
pub use snapshot::{run_snapshot, SnapshotArgs};
