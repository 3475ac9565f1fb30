//! Shared types module
//!
//! This module contains shared data types used throughout the gateway.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Global counter for connection IDs; only uniqueness is required.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection ID
    pub fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection information
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Connection ID
    pub id: ConnectionId,
    /// Remote peer address
    pub peer: SocketAddr,
    /// Local address the connection was accepted on
    pub local: SocketAddr,
    /// Accept timestamp
    pub accepted_at: SystemTime,
}

impl ConnectionInfo {
    /// Describe a freshly accepted connection
    pub fn new(peer: SocketAddr, local: SocketAddr) -> Self {
        Self {
            id: ConnectionId::next(),
            peer,
            local,
            accepted_at: SystemTime::now(),
        }
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.id, self.peer, self.local)
    }
}
