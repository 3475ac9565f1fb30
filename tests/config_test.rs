//! Configuration tests
//!
//! Loading from files and the environment. Tests touching environment
//! variables are serialized.

use std::env;
use std::fs;
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;

use protocol_gateway::config::{ConfigError, GatewayConfig};

/// Test default configuration
#[test]
fn test_default_config() {
    let config = GatewayConfig::default();

    assert_eq!(config.listen.to_string(), "0.0.0.0:8080");
    assert_eq!(config.log_level, "info");
    assert_eq!(config.buffer_size, 16 * 1024);
    assert_eq!(config.slow_probe_timeout(), Duration::from_secs(60));
    assert_eq!(config.http.slow_probe_timeout(), Duration::from_secs(60));
    assert_eq!(config.http.idle_timeout(), Duration::from_secs(600));
    assert_eq!(config.forward_idle(), Duration::from_secs(300));
    assert_eq!(config.forward_drain(), Duration::from_secs(5));
    assert_eq!(config.http.native_read_idle(), Duration::from_secs(45));
    assert_eq!(config.http.native_write_idle(), Duration::from_secs(30));
    assert_eq!(config.http.max_aggregate_size, 1 << 25);
    assert!(config.upstreams.is_empty());
    assert!(config.validate().is_ok());
}

/// Test partial configuration file on top of defaults
#[test]
#[serial]
fn test_file_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gateway.json");
    fs::write(
        &path,
        r#"{
            "listen": "127.0.0.1:9000",
            "log_level": "debug",
            "http": { "idle_timeout_secs": 5 },
            "upstreams": { "socks5": "127.0.0.1:1080" }
        }"#,
    )
    .unwrap();

    let config = GatewayConfig::load(Some(&path)).unwrap();

    assert_eq!(config.listen.to_string(), "127.0.0.1:9000");
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.http.idle_timeout(), Duration::from_secs(5));
    assert_eq!(config.http.max_head_size, 64 * 1024);
    assert_eq!(config.upstreams.socks5.unwrap().port(), 1080);
    assert!(config.upstreams.tls.is_none());
}

/// Test that a named file must exist
#[test]
#[serial]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.json");

    let result = GatewayConfig::load(Some(&path));
    assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
}

/// Test that invalid values in a file are rejected
#[test]
#[serial]
fn test_invalid_file_value() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gateway.json");
    fs::write(&path, r#"{ "buffer_size": 0 }"#).unwrap();

    assert!(GatewayConfig::load(Some(&path)).is_err());
}

/// Test environment variables overriding the file
#[test]
#[serial]
fn test_environment_overrides_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gateway.json");
    fs::write(&path, r#"{ "log_level": "debug", "http": { "idle_timeout_secs": 5 } }"#).unwrap();

    env::set_var("PROTOCOL_GATEWAY_LOG_LEVEL", "warn");
    env::set_var("PROTOCOL_GATEWAY_HTTP__IDLE_TIMEOUT_SECS", "7");
    env::set_var("PROTOCOL_GATEWAY_UPSTREAMS__TLS", "127.0.0.1:8443");

    let result = GatewayConfig::load(Some(&path));

    env::remove_var("PROTOCOL_GATEWAY_LOG_LEVEL");
    env::remove_var("PROTOCOL_GATEWAY_HTTP__IDLE_TIMEOUT_SECS");
    env::remove_var("PROTOCOL_GATEWAY_UPSTREAMS__TLS");

    let config = result.unwrap();
    assert_eq!(config.log_level, "warn");
    assert_eq!(config.http.idle_timeout(), Duration::from_secs(7));
    assert_eq!(config.upstreams.tls.unwrap().port(), 8443);
}

/// Test forwarding limits from the environment
#[test]
#[serial]
fn test_environment_forward_limits() {
    env::set_var("PROTOCOL_GATEWAY_FORWARD_IDLE_SECS", "90");
    env::set_var("PROTOCOL_GATEWAY_HTTP__NATIVE_WRITE_IDLE_SECS", "12");

    let result = GatewayConfig::load(None);

    env::remove_var("PROTOCOL_GATEWAY_FORWARD_IDLE_SECS");
    env::remove_var("PROTOCOL_GATEWAY_HTTP__NATIVE_WRITE_IDLE_SECS");

    let config = result.unwrap();
    assert_eq!(config.forward_idle(), Duration::from_secs(90));
    assert_eq!(config.http.native_write_idle(), Duration::from_secs(12));
}

/// Test that a zero drain limit is rejected
#[test]
fn test_zero_forward_drain_rejected() {
    let mut config = GatewayConfig::default();
    config.forward_drain_ms = 0;

    assert!(config.validate().is_err());
}

/// Test that an upstream may not point back at the gateway
#[test]
fn test_upstream_loop_rejected() {
    let mut config = GatewayConfig::default();
    config.listen = "127.0.0.1:9000".parse().unwrap();
    config.upstreams.tls = Some("127.0.0.1:9000".parse().unwrap());

    assert!(matches!(config.validate(), Err(ConfigError::InvalidCombination(_))));
}
