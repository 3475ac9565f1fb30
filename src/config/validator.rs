//! Configuration validator
//!
//! This module provides functionality for validating configuration.

use log::warn;

use crate::config::types::GatewayConfig;
use crate::config::error::{ConfigError, Result};

/// Validate the configuration
pub fn validate_config(config: &GatewayConfig) -> Result<()> {
    validate_network_settings(config)?;
    validate_http_settings(config)?;
    validate_general_settings(config);

    Ok(())
}

fn require_positive(name: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            "must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// Validate network settings
fn validate_network_settings(config: &GatewayConfig) -> Result<()> {
    require_positive("buffer_size", config.buffer_size as u64)?;
    require_positive("backlog", config.backlog as u64)?;
    require_positive("slow_probe_timeout_ms", config.slow_probe_timeout_ms)?;
    require_positive("connect_timeout_secs", config.connect_timeout_secs)?;
    require_positive("forward_idle_secs", config.forward_idle_secs)?;
    require_positive("forward_drain_ms", config.forward_drain_ms)?;

    let upstreams = [
        ("tls", config.upstreams.tls),
        ("socks5", config.upstreams.socks5),
        ("http_proxy", config.upstreams.http_proxy),
        ("https_proxy", config.upstreams.https_proxy),
        ("websocket", config.upstreams.websocket),
    ];
    for (name, addr) in upstreams {
        if addr == Some(config.listen) {
            return Err(ConfigError::InvalidCombination(format!(
                "upstream '{}' points back at the listen address {}",
                name, config.listen
            )));
        }
    }

    Ok(())
}

/// Validate HTTP stage settings
fn validate_http_settings(config: &GatewayConfig) -> Result<()> {
    let http = &config.http;
    require_positive("http.slow_probe_timeout_ms", http.slow_probe_timeout_ms)?;
    require_positive("http.idle_timeout_secs", http.idle_timeout_secs)?;
    require_positive("http.native_read_idle_secs", http.native_read_idle_secs)?;
    require_positive("http.native_write_idle_secs", http.native_write_idle_secs)?;
    require_positive("http.max_aggregate_size", http.max_aggregate_size as u64)?;
    require_positive("http.max_head_size", http.max_head_size as u64)?;
    require_positive("http.worker_threads", http.worker_threads as u64)?;

    Ok(())
}

/// Validate general settings
fn validate_general_settings(config: &GatewayConfig) {
    match config.log_level.as_str() {
        "error" | "warn" | "info" | "debug" | "trace" => {}
        level => {
            warn!("Unusual log level: {}. It is passed to env_logger as a filter", level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_values_rejected() {
        let mut config = GatewayConfig::default();
        config.buffer_size = 0;
        assert!(matches!(validate_config(&config), Err(ConfigError::InvalidValue(name, _)) if name == "buffer_size"));

        let mut config = GatewayConfig::default();
        config.http.idle_timeout_secs = 0;
        assert!(matches!(validate_config(&config), Err(ConfigError::InvalidValue(name, _)) if name == "http.idle_timeout_secs"));
    }

    #[test]
    fn test_upstream_loop_rejected() {
        let mut config = GatewayConfig::default();
        config.listen = "127.0.0.1:8080".parse().unwrap();
        config.upstreams.socks5 = Some(config.listen);
        assert!(matches!(validate_config(&config), Err(ConfigError::InvalidCombination(_))));
    }
}
