//! Tests for core infrastructure: configuration, time, and errors.

mod common;

use common::{create_minimal_config, load_config};
use keystone::core::config::{Config, TtlExceedsBehavior};
use keystone::core::error::KeystoneError;
use keystone::core::time::LogicalTime;

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn minimal_config_loads() {
    let file = create_minimal_config();
    let config = load_config(&file);
    assert_eq!(config.listener.queue_capacity, 64);
    assert_eq!(config.ttl.max_ttl_ms, 0);
}

#[test]
fn defaults_fill_missing_sections() {
    let config = Config::from_toml("[map]\nmax_key_bytes = 128\n").unwrap();
    assert_eq!(config.map.max_key_bytes, 128);
    assert_eq!(config.map.max_value_bytes, 1024 * 1024);
    assert_eq!(config.telemetry.log_level, "info");
}

#[test]
fn invalid_log_level_is_rejected() {
    let err = Config::from_toml("[telemetry]\nlog_level = \"chatty\"\n").unwrap_err();
    assert!(err.to_string().contains("log_level"));
}

#[test]
fn ttl_section_parses_behavior() {
    let config = Config::from_toml(
        "[ttl]\nmax_ttl_ms = 5000\nexceeds_behavior = \"reject\"\n",
    )
    .unwrap();
    assert_eq!(config.ttl.max_ttl_ms, 5000);
    assert_eq!(config.ttl.exceeds_behavior, TtlExceedsBehavior::Reject);
    assert_eq!(config.ttl.enforce(9000), Err(9000));
}

#[test]
fn config_renders_back_to_toml() {
    let config = Config::default();
    let rendered = config.to_toml().unwrap();
    let reparsed = Config::from_toml(&rendered).unwrap();
    assert_eq!(reparsed.listener.queue_capacity, config.listener.queue_capacity);
}

#[test]
fn nonexistent_config_file_errors() {
    let err = Config::from_file("/definitely/not/here.toml").unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
}

// ============================================================================
// Logical time
// ============================================================================

#[test]
fn logical_time_ordering() {
    assert!(LogicalTime::new(5) < LogicalTime::new(6));
    assert!(LogicalTime::new(10).is_at_or_after(LogicalTime::new(10)));
    assert_eq!(LogicalTime::zero().add_ms(25), LogicalTime::new(25));
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn client_rejections_are_not_fatal() {
    assert!(!KeystoneError::malformed("bad").is_fatal());
    assert!(KeystoneError::snapshot_corrupt("bad").is_fatal());
}
