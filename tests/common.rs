//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

use bytes::Bytes;
use keystone::core::config::Config;
use keystone::core::time::LogicalTime;
use keystone::map::ops::{Operation, Response};
use keystone::map::service::{CommandContext, MapService, QueryContext};
use keystone::map::store::UpdateResult;
use keystone::map::versioned::Versioned;
use std::io::Write;
use tempfile::NamedTempFile;

/// Byte value shorthand.
pub fn b(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

/// Create a minimal valid configuration file.
pub fn create_minimal_config() -> NamedTempFile {
    let config_content = r#"
[listener]
queue_capacity = 64

[ttl]
max_ttl_ms = 0
"#;

    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(config_content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Load a config from a temp file.
pub fn load_config(file: &NamedTempFile) -> Config {
    Config::from_file(file.path()).expect("Failed to load config")
}

/// Drives a [`MapService`] the way the consensus layer would: commands
/// get strictly increasing log indexes and a caller-controlled logical
/// timestamp, queries are served linearizably.
pub struct Driver {
    pub service: MapService,
    pub session: u64,
    index: u64,
    now_ms: u64,
}

impl Driver {
    /// Driver over a default-configured service.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Driver over a service with the given configuration.
    pub fn with_config(config: Config) -> Self {
        Self {
            service: MapService::new(config),
            session: 1,
            index: 0,
            now_ms: 0,
        }
    }

    /// Set the logical timestamp for subsequent commands.
    pub fn at(&mut self, ms: u64) -> &mut Self {
        self.now_ms = ms;
        self
    }

    /// Apply a command at the next log index.
    pub fn apply(&mut self, op: Operation) -> Response {
        self.index += 1;
        let ctx = CommandContext {
            index: self.index,
            timestamp: LogicalTime::new(self.now_ms),
            session: self.session,
            sequence: self.index,
        };
        self.service.apply(&ctx, op)
    }

    /// Serve a linearizable query.
    pub fn query(&mut self, op: Operation) -> Response {
        let ctx = QueryContext::linearizable(self.session);
        self.service.query(&ctx, op)
    }

    /// Apply an unconditional put.
    pub fn put(&mut self, key: &str, value: &str) -> UpdateResult {
        self.put_ttl(key, value, 0)
    }

    /// Apply an unconditional put with a TTL.
    pub fn put_ttl(&mut self, key: &str, value: &str, ttl_ms: u64) -> UpdateResult {
        let response = self.apply(Operation::Put {
            key: key.to_string(),
            value: b(value),
            ttl_ms,
        });
        expect_update(response)
    }

    /// Serve a get query.
    pub fn get(&mut self, key: &str) -> Option<Versioned> {
        match self.query(Operation::Get {
            key: key.to_string(),
        }) {
            Response::Value(v) => v,
            other => panic!("Expected Value response, got {:?}", other),
        }
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

/// Unwrap an update response.
#[track_caller]
pub fn expect_update(response: Response) -> UpdateResult {
    match response {
        Response::Update(result) => result,
        other => panic!("Expected Update response, got {:?}", other),
    }
}

/// Unwrap a flag response.
#[track_caller]
pub fn expect_flag(response: Response) -> bool {
    match response {
        Response::Flag(flag) => flag,
        other => panic!("Expected Flag response, got {:?}", other),
    }
}

/// Unwrap a size response.
#[track_caller]
pub fn expect_size(response: Response) -> u64 {
    match response {
        Response::Size(size) => size,
        other => panic!("Expected Size response, got {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_assigns_increasing_indexes() {
        let mut driver = Driver::new();
        driver.put("a", "1");
        driver.put("b", "2");
        assert_eq!(driver.service.last_applied(), 2);
    }

    #[test]
    fn config_helpers_round_trip() {
        let file = create_minimal_config();
        let config = load_config(&file);
        assert_eq!(config.listener.queue_capacity, 64);
    }
}
