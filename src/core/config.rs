//! Configuration parsing and validation.
//!
//! Configuration is loaded from TOML files. Every section has serde
//! defaults so a minimal (even empty) file is valid; `validate()` checks
//! the cross-field constraints that serde cannot express.
//!
//! The limits configured here are enforced before an operation reaches
//! the entry store, so replicas with identical configuration make
//! identical accept/reject decisions.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Key/value size limits for map operations.
    #[serde(default)]
    pub map: MapLimits,

    /// Listener event queue settings.
    #[serde(default)]
    pub listener: ListenerConfig,

    /// TTL bounds and enforcement behavior.
    #[serde(default)]
    pub ttl: TtlConfig,

    /// Telemetry settings.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Size limits for keys and values. Zero means unlimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapLimits {
    /// Maximum key length in bytes.
    #[serde(default = "default_max_key_bytes")]
    pub max_key_bytes: usize,

    /// Maximum value length in bytes.
    #[serde(default = "default_max_value_bytes")]
    pub max_value_bytes: usize,
}

impl Default for MapLimits {
    fn default() -> Self {
        Self {
            max_key_bytes: default_max_key_bytes(),
            max_value_bytes: default_max_value_bytes(),
        }
    }
}

fn default_max_key_bytes() -> usize {
    1024
}

fn default_max_value_bytes() -> usize {
    1024 * 1024
}

/// Listener event queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Maximum queued events per session before overflow.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    1024
}

/// Behavior when a requested TTL exceeds the configured maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlExceedsBehavior {
    /// Clamp the TTL to the maximum allowed.
    Clamp,
    /// Reject the operation as malformed.
    Reject,
}

impl Default for TtlExceedsBehavior {
    fn default() -> Self {
        Self::Clamp
    }
}

/// TTL bounds and enforcement behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlConfig {
    /// Maximum TTL in milliseconds. Zero means unbounded.
    #[serde(default)]
    pub max_ttl_ms: u64,

    /// What to do when a requested TTL exceeds `max_ttl_ms`.
    #[serde(default)]
    pub exceeds_behavior: TtlExceedsBehavior,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            max_ttl_ms: 0,
            exceeds_behavior: TtlExceedsBehavior::default(),
        }
    }
}

impl TtlConfig {
    /// Apply the configured bounds to a requested TTL.
    ///
    /// Returns `Ok(adjusted_ttl_ms)` when the TTL is acceptable (possibly
    /// clamped), `Err(requested)` when the TTL must be rejected.
    pub fn enforce(&self, requested_ttl_ms: u64) -> Result<u64, u64> {
        if self.max_ttl_ms == 0 || requested_ttl_ms <= self.max_ttl_ms {
            return Ok(requested_ttl_ms);
        }
        match self.exceeds_behavior {
            TtlExceedsBehavior::Clamp => Ok(self.max_ttl_ms),
            TtlExceedsBehavior::Reject => Err(requested_ttl_ms),
        }
    }
}

/// Telemetry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.listener.queue_capacity == 0 {
            anyhow::bail!("listener.queue_capacity must be > 0");
        }
        match self.telemetry.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => anyhow::bail!("telemetry.log_level {:?} is not a valid level", other),
        }
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render config")
    }
}
