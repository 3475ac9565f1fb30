//! Common module
//!
//! This module contains shared types, errors, and utility functions used throughout the gateway.

pub mod error;
pub mod log;
pub mod net;
pub mod stream;
pub mod types;

// Re-export commonly used types and functions
pub use error::{GatewayError, Result};
pub use log::init_logger;
pub use net::{bind_listener, close_on_flush, configure_stream, parse_socket_addr};
pub use stream::{AsyncStream, BoxedStream, PrefixedStream};
pub use types::{ConnectionId, ConnectionInfo};
