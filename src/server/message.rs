//! Gateway control messages
//!
//! The accept loop owns all server state; other tasks talk to it through a
//! `GatewayHandle` instead of sharing locks.

use std::net::SocketAddr;

use tokio::sync::{mpsc, oneshot};

use crate::common::{GatewayError, Result};

/// Server statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayStats {
    /// Address the gateway listens on
    pub local_addr: SocketAddr,
    /// Connections currently open
    pub active_connections: usize,
    /// Connections accepted since start
    pub total_accepted: u64,
}

/// Messages that can be sent to the gateway service
#[derive(Debug)]
pub enum GatewayMessage {
    /// Report statistics
    Stats {
        /// Where to send them
        reply: oneshot::Sender<GatewayStats>,
    },
    /// Stop accepting, drain connections and stop
    Shutdown {
        /// Signalled once the gateway has stopped
        done: oneshot::Sender<()>,
    },
}

/// Gateway control handle
#[derive(Debug, Clone)]
pub struct GatewayHandle {
    sender: mpsc::Sender<GatewayMessage>,
    local_addr: SocketAddr,
}

impl GatewayHandle {
    /// Create a new handle
    pub fn new(sender: mpsc::Sender<GatewayMessage>, local_addr: SocketAddr) -> Self {
        Self { sender, local_addr }
    }

    /// Address the gateway is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send a message to the gateway service
    pub async fn send(&self, message: GatewayMessage) -> Result<()> {
        self.sender
            .send(message)
            .await
            .map_err(|_| GatewayError::Other("Failed to send message to gateway service".to_string()))
    }

    /// Fetch current statistics
    pub async fn stats(&self) -> Result<GatewayStats> {
        let (reply, rx) = oneshot::channel();
        self.send(GatewayMessage::Stats { reply }).await?;
        rx.await
            .map_err(|_| GatewayError::Other("Gateway service stopped before replying".to_string()))
    }

    /// Shut the gateway down and wait until it has stopped
    pub async fn shutdown(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(GatewayMessage::Shutdown { done }).await?;
        rx.await
            .map_err(|_| GatewayError::Other("Gateway service stopped before confirming shutdown".to_string()))
    }
}

/// Create a new gateway message channel
pub fn create_channel(local_addr: SocketAddr) -> (GatewayHandle, mpsc::Receiver<GatewayMessage>) {
    let (tx, rx) = mpsc::channel(100);
    (GatewayHandle::new(tx, local_addr), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stats_round_trip() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let (handle, mut rx) = create_channel(addr);

        let service = tokio::spawn(async move {
            if let Some(GatewayMessage::Stats { reply }) = rx.recv().await {
                let _ = reply.send(GatewayStats { local_addr: addr, active_connections: 2, total_accepted: 5 });
            }
        });

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.active_connections, 2);
        assert_eq!(stats.total_accepted, 5);
        service.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_after_service_gone() {
        let (handle, rx) = create_channel("127.0.0.1:9000".parse().unwrap());
        drop(rx);
        assert!(handle.shutdown().await.is_err());
    }
}
