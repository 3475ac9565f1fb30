//! Configuration types
//!
//! Every field has a default, so a partial JSON file or a handful of
//! environment variables is enough to produce a complete configuration.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::defaults;

/// Top-level gateway configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listen address
    pub listen: SocketAddr,
    /// Log level
    pub log_level: String,
    /// Listener accept backlog
    pub backlog: u32,
    /// TCP_NODELAY on accepted sockets
    pub tcp_nodelay: bool,
    /// SO_KEEPALIVE on accepted sockets
    pub tcp_keepalive: bool,
    /// Read buffer size in bytes
    pub buffer_size: usize,
    /// Deadline for the outer protocol classifier, in milliseconds
    pub slow_probe_timeout_ms: u64,
    /// Upstream connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Close forwarded connections with no traffic for this long, in seconds
    pub forward_idle_secs: u64,
    /// How long a forwarded connection drains after one side closed, in milliseconds
    pub forward_drain_ms: u64,
    /// How long shutdown waits for in-flight connections, in seconds
    pub shutdown_grace_secs: u64,
    /// HTTP stage settings
    pub http: HttpConfig,
    /// Forwarding targets for non-HTTP protocols
    pub upstreams: UpstreamConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: defaults::listen(),
            log_level: defaults::log_level(),
            backlog: defaults::backlog(),
            tcp_nodelay: defaults::tcp_nodelay(),
            tcp_keepalive: defaults::tcp_keepalive(),
            buffer_size: defaults::buffer_size(),
            slow_probe_timeout_ms: defaults::slow_probe_timeout_ms(),
            connect_timeout_secs: defaults::connect_timeout_secs(),
            forward_idle_secs: defaults::forward_idle_secs(),
            forward_drain_ms: defaults::forward_drain_ms(),
            shutdown_grace_secs: defaults::shutdown_grace_secs(),
            http: HttpConfig::default(),
            upstreams: UpstreamConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Outer classifier deadline
    pub fn slow_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.slow_probe_timeout_ms)
    }

    /// Upstream connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Idle limit of forwarded connections
    pub fn forward_idle(&self) -> Duration {
        Duration::from_secs(self.forward_idle_secs)
    }

    /// Drain limit of forwarded connections
    pub fn forward_drain(&self) -> Duration {
        Duration::from_millis(self.forward_drain_ms)
    }

    /// Shutdown grace period
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Settings for the HTTP sub-router and the pipelines behind it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Deadline for the HTTP routing stage, in milliseconds
    pub slow_probe_timeout_ms: u64,
    /// Idle-read timeout of the default pipeline, in seconds
    pub idle_timeout_secs: u64,
    /// Read-idle timeout of native pipelines, in seconds
    pub native_read_idle_secs: u64,
    /// Write-idle timeout of native pipelines, in seconds
    pub native_write_idle_secs: u64,
    /// Largest aggregated message (request body or upgrade payload), in bytes
    pub max_aggregate_size: usize,
    /// Largest request head, in bytes
    pub max_head_size: usize,
    /// Blocking worker pool size for application dispatch
    pub worker_threads: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            slow_probe_timeout_ms: defaults::http_slow_probe_timeout_ms(),
            idle_timeout_secs: defaults::http_idle_timeout_secs(),
            native_read_idle_secs: defaults::native_read_idle_secs(),
            native_write_idle_secs: defaults::native_write_idle_secs(),
            max_aggregate_size: defaults::max_aggregate_size(),
            max_head_size: defaults::max_head_size(),
            worker_threads: defaults::worker_threads(),
        }
    }
}

impl HttpConfig {
    /// HTTP routing stage deadline
    pub fn slow_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.slow_probe_timeout_ms)
    }

    /// Default pipeline idle-read timeout
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Native pipeline read-idle timeout
    pub fn native_read_idle(&self) -> Duration {
        Duration::from_secs(self.native_read_idle_secs)
    }

    /// Native pipeline write-idle timeout
    pub fn native_write_idle(&self) -> Duration {
        Duration::from_secs(self.native_write_idle_secs)
    }
}

/// Where to forward connections the gateway does not serve itself
///
/// An unset entry means the protocol is not accepted at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// TLS (raw passthrough, no termination)
    pub tls: Option<SocketAddr>,
    /// SOCKS5 server
    pub socks5: Option<SocketAddr>,
    /// Forward proxy for absolute-URI HTTP requests
    pub http_proxy: Option<SocketAddr>,
    /// Tunnel endpoint for CONNECT requests
    pub https_proxy: Option<SocketAddr>,
    /// Backend for WebSocket upgrades
    pub websocket: Option<SocketAddr>,
}

impl UpstreamConfig {
    /// Whether any forwarding target is configured
    pub fn is_empty(&self) -> bool {
        self.tls.is_none()
            && self.socks5.is_none()
            && self.http_proxy.is_none()
            && self.https_proxy.is_none()
            && self.websocket.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: GatewayConfig = serde_json::from_str(r#"{
            "listen": "127.0.0.1:9000",
            "http": { "idle_timeout_secs": 5 }
        }"#).unwrap();

        assert_eq!(config.listen.port(), 9000);
        assert_eq!(config.http.idle_timeout(), Duration::from_secs(5));
        assert_eq!(config.http.slow_probe_timeout_ms, 60_000);
        assert_eq!(config.slow_probe_timeout(), Duration::from_secs(60));
        assert!(config.upstreams.is_empty());
    }
}
