//! Gateway server module
//!
//! This module owns the listener and the per-connection tasks, and provides
//! the forwarders for protocols the gateway does not serve itself.
//!
//! The accept loop is message-driven: statistics and shutdown requests go
//! through a [`GatewayHandle`] instead of shared locks.

mod builder;
mod forwarder;
mod handler;
mod message;
pub mod server;

pub use builder::GatewayBuilder;
pub use forwarder::{connect_upstream, proxy_data, ForwardLimits, ForwardMatcher, UpgradeForwarder};
pub use handler::{handle_connection, GatewayContext};
pub use message::{create_channel, GatewayHandle, GatewayMessage, GatewayStats};
pub use server::Gateway;
