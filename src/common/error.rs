//! Error handling module
//!
//! This module defines the error types and result type aliases used in the gateway.

use thiserror::Error;
use std::io;

/// Protocol gateway error type
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Socket I/O failure
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The classifier received something other than raw bytes
    #[error("Unexpected message kind for protocol detection: {0}")]
    UnexpectedMessageKind(String),

    /// No matcher accepted the accumulated bytes
    #[error("No protocol matched {buffered} buffered bytes")]
    MatchExhausted {
        /// Number of bytes that were inspected
        buffered: usize,
    },

    /// A connection stayed in an undecided stage past its deadline
    #[error("{stage} stage meet slow attack: still undecided after {timeout_ms}ms")]
    SlowProbeTimeout {
        /// Stage that stalled
        stage: &'static str,
        /// Configured deadline in milliseconds
        timeout_ms: u64,
    },

    /// The worker pool rejected an application task
    #[error("Application dispatch failed: {0}")]
    ApplicationDispatch(String),

    /// Malformed HTTP request
    #[error("HTTP parse error: {0}")]
    HttpParse(String),

    /// No data read within the idle timeout
    #[error("Read timeout after {0}s of inactivity")]
    IdleTimeout(u64),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

impl GatewayError {
    /// Whether this error looks like a transport failure (socket I/O or a stalled peer)
    pub fn is_transport(&self) -> bool {
        matches!(self, GatewayError::Io(_) | GatewayError::SlowProbeTimeout { .. })
    }
}

/// Result type alias
///
/// This is a `Result` type alias that uses our custom `GatewayError`.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "Connection reset by peer");
        let gateway_err: GatewayError = io_err.into();

        match gateway_err {
            GatewayError::Io(_) => {}
            _ => panic!("Should convert to IO error"),
        }
    }

    #[test]
    fn test_error_display() {
        let err = GatewayError::SlowProbeTimeout { stage: "classifying", timeout_ms: 60_000 };
        let err_str = format!("{}", err);
        assert!(err_str.contains("classifying"));
        assert!(err_str.contains("60000ms"));

        let err = GatewayError::MatchExhausted { buffered: 12 };
        assert!(err.to_string().contains("12"));
    }

    #[test]
    fn test_transport_classification() {
        assert!(GatewayError::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_transport());
        assert!(GatewayError::SlowProbeTimeout { stage: "http", timeout_ms: 1 }.is_transport());
        assert!(!GatewayError::UnexpectedMessageKind("http".to_string()).is_transport());
        assert!(!GatewayError::Config("bad".to_string()).is_transport());
    }
}
