//! Gateway builder
//!
//! Assembles the matcher set, callbacks and HTTP application into a
//! [`Gateway`]. The built-in HTTP matcher is always evaluated first.

use std::sync::Arc;

use log::debug;

use crate::common::Result;
use crate::config::GatewayConfig;
use crate::http::{DefaultPipeline, HttpApplication, HttpMatcher, HttpService, StatusApplication, WorkerPool};
use crate::protocol::{
    CallbackSink, CompositeCallback, GatewayCallback, LoggingCallback, MatcherSet, Probe, ProtocolMatcher,
};

use super::forwarder::{ForwardLimits, ForwardMatcher, UpgradeForwarder};
use super::server::Gateway;

/// Builder for [`Gateway`]
///
/// # Example
///
/// ```no_run
/// # use protocol_gateway::{GatewayBuilder, Result};
/// # use protocol_gateway::config::GatewayConfig;
/// # async fn example() -> Result<()> {
/// let gateway = GatewayBuilder::new(GatewayConfig::default())
///     .with_configured_upstreams()
///     .build()?;
/// let handle = gateway.start()?;
/// handle.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct GatewayBuilder {
    config: GatewayConfig,
    protocol_matchers: Vec<Arc<dyn ProtocolMatcher>>,
    http_matchers: Vec<Arc<dyn HttpMatcher>>,
    callbacks: Vec<Arc<dyn GatewayCallback>>,
    application: Option<Arc<dyn HttpApplication>>,
}

impl GatewayBuilder {
    /// Start from a configuration
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            protocol_matchers: Vec::new(),
            http_matchers: Vec::new(),
            callbacks: Vec::new(),
            application: None,
        }
    }

    /// Add a protocol matcher, evaluated after HTTP and earlier additions
    pub fn protocol_matcher(mut self, matcher: Arc<dyn ProtocolMatcher>) -> Self {
        self.protocol_matchers.push(matcher);
        self
    }

    /// Add a native HTTP matcher, evaluated in insertion order
    pub fn http_matcher(mut self, matcher: Arc<dyn HttpMatcher>) -> Self {
        self.http_matchers.push(matcher);
        self
    }

    /// Add a callback
    pub fn callback(mut self, callback: Arc<dyn GatewayCallback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Set the application served by the default HTTP pipeline
    pub fn application(mut self, application: Arc<dyn HttpApplication>) -> Self {
        self.application = Some(application);
        self
    }

    /// Register forwarders for every upstream in the configuration
    ///
    /// Proxy probes come before SOCKS5 and TLS; the WebSocket upstream
    /// becomes a native HTTP matcher.
    pub fn with_configured_upstreams(mut self) -> Self {
        let upstreams = self.config.upstreams.clone();
        let connect_timeout = self.config.connect_timeout();
        let limits = ForwardLimits::from_config(&self.config);

        let forwards = [
            (Probe::HttpsProxy, upstreams.https_proxy),
            (Probe::HttpProxy, upstreams.http_proxy),
            (Probe::Socks5, upstreams.socks5),
            (Probe::Tls, upstreams.tls),
        ];
        for (probe, upstream) in forwards {
            if let Some(addr) = upstream {
                debug!("Forwarding {} to {}", probe.name(), addr);
                self.protocol_matchers
                    .push(Arc::new(ForwardMatcher::new(probe, addr, connect_timeout).with_limits(limits)));
            }
        }

        if let Some(addr) = upstreams.websocket {
            debug!("Forwarding websocket upgrades to {}", addr);
            self.http_matchers.push(Arc::new(UpgradeForwarder::new(addr, connect_timeout)));
        }
        self
    }

    /// Validate the configuration and assemble the gateway
    pub fn build(self) -> Result<Gateway> {
        self.config.validate()?;

        let http_config = self.config.http.clone();
        let application = self
            .application
            .unwrap_or_else(|| Arc::new(StatusApplication::default()));
        let pipeline = DefaultPipeline::new(
            application,
            WorkerPool::new(http_config.worker_threads),
            http_config.idle_timeout(),
            http_config.max_aggregate_size,
        );
        let http: Arc<dyn ProtocolMatcher> = Arc::new(HttpService::new(http_config, self.http_matchers, pipeline));
        let matchers = MatcherSet::new(http, self.protocol_matchers);

        let mut callbacks = self.callbacks;
        let callback: Arc<dyn GatewayCallback> = match callbacks.len() {
            0 => Arc::new(LoggingCallback),
            1 => callbacks.remove(0),
            _ => Arc::new(CompositeCallback::new(callbacks)),
        };

        Ok(Gateway::new(Arc::new(self.config), matchers, CallbackSink::new(callback)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::GatewayError;

    #[test]
    fn test_http_first_then_configured_order() {
        let mut config = GatewayConfig::default();
        config.upstreams.tls = Some("127.0.0.1:7001".parse().unwrap());
        config.upstreams.socks5 = Some("127.0.0.1:7002".parse().unwrap());
        config.upstreams.https_proxy = Some("127.0.0.1:7003".parse().unwrap());

        let gateway = GatewayBuilder::new(config).with_configured_upstreams().build().unwrap();
        assert_eq!(gateway.matcher_names(), vec!["http", "https-proxy", "socks5", "tls"]);
    }

    #[test]
    fn test_http_only_by_default() {
        let gateway = GatewayBuilder::new(GatewayConfig::default()).build().unwrap();
        assert_eq!(gateway.matcher_names(), vec!["http"]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = GatewayConfig::default();
        config.buffer_size = 0;
        assert!(matches!(GatewayBuilder::new(config).build(), Err(GatewayError::Config(_))));
    }
}
