//! Protocol Gateway Command Line Tool
//!
//! This binary is the command-line interface for Protocol Gateway.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::info;

use protocol_gateway::common::{init_logger, Result};
use protocol_gateway::config::GatewayConfig;
use protocol_gateway::http::StatusApplication;
use protocol_gateway::protocol::{LoggingCallback, MetricsCallback};
use protocol_gateway::{GatewayBuilder, APP_NAME, VERSION};

/// Protocol Gateway: serve HTTP and forward proxy, SOCKS5 and TLS traffic on one port
#[derive(Parser, Debug)]
#[clap(author, version = VERSION, about, long_about = None)]
struct Args {
    /// Load configuration from a file (defaults to config.json when present)
    #[clap(short, long, env = "PROTOCOL_GATEWAY_CONFIG")]
    config_file: Option<PathBuf>,

    /// Listen address
    #[clap(short, long)]
    listen: Option<SocketAddr>,

    /// Log level
    #[clap(long)]
    log_level: Option<String>,

    /// Outer classifier deadline in milliseconds
    #[clap(long)]
    slow_probe_timeout_ms: Option<u64>,

    /// Upstream for TLS connections
    #[clap(long)]
    tls_upstream: Option<SocketAddr>,

    /// Upstream for SOCKS5 connections
    #[clap(long)]
    socks5_upstream: Option<SocketAddr>,

    /// Upstream for absolute-form HTTP proxy requests
    #[clap(long)]
    http_proxy_upstream: Option<SocketAddr>,

    /// Upstream for CONNECT tunnels
    #[clap(long)]
    https_proxy_upstream: Option<SocketAddr>,

    /// Upstream for WebSocket upgrades
    #[clap(long)]
    websocket_upstream: Option<SocketAddr>,
}

impl Args {
    /// Apply command line overrides on top of the loaded configuration
    fn apply(&self, config: &mut GatewayConfig) {
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(timeout) = self.slow_probe_timeout_ms {
            config.slow_probe_timeout_ms = timeout;
        }

        let upstreams = &mut config.upstreams;
        upstreams.tls = self.tls_upstream.or(upstreams.tls);
        upstreams.socks5 = self.socks5_upstream.or(upstreams.socks5);
        upstreams.http_proxy = self.http_proxy_upstream.or(upstreams.http_proxy);
        upstreams.https_proxy = self.https_proxy_upstream.or(upstreams.https_proxy);
        upstreams.websocket = self.websocket_upstream.or(upstreams.websocket);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // File and environment first, command line last
    let mut config = GatewayConfig::load(args.config_file.as_deref())?;
    args.apply(&mut config);

    init_logger(&config.log_level);
    info!("Starting {} v{}", APP_NAME, VERSION);

    if config.upstreams.is_empty() {
        info!("No upstreams configured, only plain HTTP will be served");
    }

    let gateway = GatewayBuilder::new(config)
        .callback(Arc::new(LoggingCallback))
        .callback(Arc::new(MetricsCallback))
        .application(Arc::new(StatusApplication::default()))
        .with_configured_upstreams()
        .build()?;

    info!("Gateway ready, press Ctrl+C to stop");

    // Run until Ctrl+C
    gateway.run().await
}
