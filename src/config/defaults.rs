//! Default configuration values
//!
//! Single source of truth for every default used by `GatewayConfig`.

use std::net::SocketAddr;

/// Environment variable prefix for all configuration options
///
/// Nested keys use a double underscore, e.g. `PROTOCOL_GATEWAY_HTTP__IDLE_TIMEOUT_SECS`.
pub const ENV_PREFIX: &str = "PROTOCOL_GATEWAY";

/// Separator between nested keys in environment variable names
pub const ENV_SEPARATOR: &str = "__";

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Default log level as string
pub const LOG_LEVEL_STR: &str = "info";

/// Default listen address
pub fn listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Default log level
pub fn log_level() -> String {
    LOG_LEVEL_STR.to_string()
}

/// Default accept backlog
pub fn backlog() -> u32 {
    1024
}

/// TCP_NODELAY on accepted sockets
pub fn tcp_nodelay() -> bool {
    true
}

/// SO_KEEPALIVE on accepted sockets
pub fn tcp_keepalive() -> bool {
    false
}

/// Default read buffer size (16KB)
pub fn buffer_size() -> usize {
    16 * 1024
}

/// Outer classifier slow-probe deadline in milliseconds
pub fn slow_probe_timeout_ms() -> u64 {
    60_000
}

/// Upstream connect timeout in seconds
pub fn connect_timeout_secs() -> u64 {
    30
}

/// Idle limit of forwarded connections in seconds
pub fn forward_idle_secs() -> u64 {
    300
}

/// Drain limit once one side of a forwarded connection closed, in milliseconds
pub fn forward_drain_ms() -> u64 {
    5_000
}

/// Grace period for in-flight connections on shutdown, in seconds
pub fn shutdown_grace_secs() -> u64 {
    30
}

/// HTTP routing stage slow-probe deadline in milliseconds
pub fn http_slow_probe_timeout_ms() -> u64 {
    60_000
}

/// Idle-read timeout of the default HTTP pipeline in seconds
pub fn http_idle_timeout_secs() -> u64 {
    600
}

/// Read-idle timeout of native (upgraded) pipelines in seconds
pub fn native_read_idle_secs() -> u64 {
    45
}

/// Write-idle timeout of native (upgraded) pipelines in seconds
pub fn native_write_idle_secs() -> u64 {
    30
}

/// Largest aggregated message accepted by any HTTP pipeline (32MB)
pub fn max_aggregate_size() -> usize {
    1 << 25
}

/// Largest request head accepted by the decoder (64KB)
pub fn max_head_size() -> usize {
    64 * 1024
}

/// Size of the blocking worker pool for application dispatch
pub fn worker_threads() -> usize {
    let io_threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .max(2);
    io_threads * 8
}
