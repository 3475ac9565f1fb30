//! Gateway service implementation
//!
//! One task owns the listener and every piece of mutable server state. It
//! accepts connections, spawns one task per connection and answers control
//! messages sent through a `GatewayHandle`.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::net::TcpListener;
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use crate::common::{bind_listener, configure_stream, ConnectionInfo, Result};
use crate::config::GatewayConfig;
use crate::protocol::{CallbackSink, ConnectionRegistry, MatcherSet};

use super::handler::{handle_connection, GatewayContext};
use super::message::{create_channel, GatewayHandle, GatewayMessage, GatewayStats};

/// Protocol-detection gateway
///
/// Built by `GatewayBuilder`; `start` binds the listener and returns a
/// handle to control the running service.
pub struct Gateway {
    context: Arc<GatewayContext>,
}

impl Gateway {
    /// Create a gateway from its parts
    ///
    /// # Parameters
    ///
    /// * `config` - Gateway configuration
    /// * `matchers` - Ordered protocol matchers
    /// * `sink` - Callback sink shared by all connections
    pub fn new(config: Arc<GatewayConfig>, matchers: MatcherSet, sink: CallbackSink) -> Self {
        Self {
            context: Arc::new(GatewayContext {
                config,
                matchers,
                sink,
                registry: ConnectionRegistry::new(),
            }),
        }
    }

    /// Gateway configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.context.config
    }

    /// Names of the protocol matchers in evaluation order
    pub fn matcher_names(&self) -> Vec<String> {
        self.context.matchers.names()
    }

    /// Bind the listener and start serving
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if it cannot bind to the listen address.
    pub fn start(self) -> Result<GatewayHandle> {
        let config = &self.context.config;
        let listener = bind_listener(config.listen, config.backlog)?;
        let local_addr = listener.local_addr()?;

        info!("Gateway listening on {}", local_addr);
        info!("Protocol matchers: {}", self.matcher_names().join(", "));

        let (handle, rx) = create_channel(local_addr);
        tokio::spawn(run_service(self.context, listener, local_addr, rx));
        Ok(handle)
    }

    /// Serve until Ctrl+C, then shut down gracefully
    pub async fn run(self) -> Result<()> {
        let handle = self.start()?;
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down...");
        handle.shutdown().await
    }
}

/// Accept loop and control message dispatch
async fn run_service(
    context: Arc<GatewayContext>,
    listener: TcpListener,
    local_addr: SocketAddr,
    mut rx: mpsc::Receiver<GatewayMessage>,
) {
    let mut tasks: JoinSet<()> = JoinSet::new();
    let mut total_accepted = 0u64;
    let mut done: Option<oneshot::Sender<()>> = None;

    loop {
        select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((client_stream, peer)) => {
                        total_accepted += 1;
                        let config = &context.config;
                        if let Err(e) = configure_stream(&client_stream, config.tcp_nodelay, config.tcp_keepalive) {
                            warn!("Failed to set socket options for {}: {}", peer, e);
                        }

                        let local = client_stream.local_addr().unwrap_or(local_addr);
                        let conn = ConnectionInfo::new(peer, local);
                        debug!("Accepted connection {} from {}", conn.id, peer);

                        let ctx = Arc::clone(&context);
                        tasks.spawn(async move {
                            let id = conn.id;
                            if let Err(e) = handle_connection(client_stream, conn, ctx).await {
                                debug!("Connection {} ended: {}", id, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                    }
                }
            }

            message = rx.recv() => {
                match message {
                    Some(GatewayMessage::Stats { reply }) => {
                        let _ = reply.send(GatewayStats {
                            local_addr,
                            active_connections: context.registry.len(),
                            total_accepted,
                        });
                    }
                    Some(GatewayMessage::Shutdown { done: signal }) => {
                        info!("Received shutdown message");
                        done = Some(signal);
                        break;
                    }
                    None => {
                        debug!("All gateway handles dropped, stopping");
                        break;
                    }
                }
            }

            Some(result) = tasks.join_next() => {
                if let Err(e) = result {
                    error!("Connection task error: {}", e);
                }
            }
        }
    }

    drop(listener);

    let grace = context.config.shutdown_grace();
    if !tasks.is_empty() {
        info!("Waiting up to {:?} for {} connection(s) to finish", grace, tasks.len());
        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Aborting {} connection(s) still open after shutdown grace", tasks.len());
            tasks.shutdown().await;
        }
    }

    info!("Gateway on {} stopped", local_addr);
    if let Some(done) = done {
        let _ = done.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Probe, ProtocolMatcher};
    use crate::server::forwarder::ForwardMatcher;
    use std::time::Duration;

    fn gateway() -> Gateway {
        let mut config = GatewayConfig::default();
        config.listen = "127.0.0.1:0".parse().unwrap();
        config.shutdown_grace_secs = 0;
        let socks: Arc<dyn ProtocolMatcher> =
            Arc::new(ForwardMatcher::new(Probe::Socks5, "127.0.0.1:9".parse().unwrap(), Duration::from_secs(1)));
        Gateway::new(Arc::new(config), MatcherSet::from_ordered(vec![socks]).unwrap(), CallbackSink::default())
    }

    #[test]
    fn test_matcher_names() {
        assert_eq!(gateway().matcher_names(), vec!["socks5".to_string()]);
    }

    #[tokio::test]
    async fn test_start_stats_and_shutdown() {
        let handle = gateway().start().unwrap();
        assert_ne!(handle.local_addr().port(), 0);

        let client = tokio::net::TcpStream::connect(handle.local_addr()).await.unwrap();
        // The accept happens on the service task; poll until it is counted.
        let mut stats = handle.stats().await.unwrap();
        for _ in 0..50 {
            if stats.total_accepted == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            stats = handle.stats().await.unwrap();
        }
        assert_eq!(stats.total_accepted, 1);
        assert_eq!(stats.local_addr, handle.local_addr());

        handle.shutdown().await.unwrap();
        drop(client);
        assert!(handle.stats().await.is_err());
    }
}
