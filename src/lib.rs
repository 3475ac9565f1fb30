//! Protocol Gateway: one listening port, many protocols
//!
//! The gateway accepts TCP connections on a single port and decides from the
//! first bytes which protocol the peer speaks. Plain HTTP is served in
//! process; HTTP proxy requests, CONNECT tunnels, SOCKS5 and TLS are handed
//! to pluggable pipelines, by default byte-for-byte forwarders.
//!
//! # Main Features
//!
//! - Ordered, pluggable protocol matchers with a built-in HTTP matcher first
//! - HTTP sub-routing between native pipelines (e.g. WebSocket upgrades) and
//!   a default request/response pipeline
//! - Slow-probe protection for connections that never finish a decision
//! - Callbacks for classification events, logging and metrics
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use protocol_gateway::{GatewayBuilder, Result};
//! use protocol_gateway::config::GatewayConfig;
//! use protocol_gateway::protocol::{LoggingCallback, MetricsCallback};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = GatewayConfig::load(None)?;
//!
//!     let gateway = GatewayBuilder::new(config)
//!         .callback(Arc::new(LoggingCallback))
//!         .callback(Arc::new(MetricsCallback))
//!         .with_configured_upstreams()
//!         .build()?;
//!
//!     // Serve until Ctrl+C
//!     gateway.run().await
//! }
//! ```

// Public modules
pub mod common;
pub mod config;
pub mod http;
pub mod protocol;
pub mod server;

// Re-export commonly used structures and functions for convenience
pub use common::{parse_socket_addr, GatewayError, Result};
pub use server::{Gateway, GatewayBuilder, GatewayHandle, GatewayStats};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
