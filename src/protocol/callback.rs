//! Gateway callbacks
//!
//! Observers notified about classification and routing events. Callbacks are
//! fire-and-forget: whatever they do, including panicking, never changes how
//! a connection is classified.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use log::{error, log, Level};
use metrics::counter;

use crate::common::{ConnectionInfo, GatewayError};
use crate::http::RequestHead;

/// Observer of gateway events
///
/// Every method has an empty default, implement only what you need.
pub trait GatewayCallback: Send + Sync {
    /// A connection was accepted
    fn on_connection_init(&self, _conn: &ConnectionInfo) {}

    /// No matcher accepted the bytes; the connection is about to be closed
    fn on_all_match_miss(&self, _conn: &ConnectionInfo, _buf: &[u8]) {}

    /// A matcher accepted the connection
    fn on_protocol_matched(&self, _conn: &ConnectionInfo, _protocol: &str) {}

    /// An HTTP request is being served by the default pipeline
    fn on_enter_default_pipeline(&self, _conn: &ConnectionInfo, _head: &RequestHead) {}

    /// A request is being dispatched to the application
    fn on_application_dispatch(&self, _conn: &ConnectionInfo, _url: &str) {}

    /// Diagnostic message about a connection
    fn log(&self, _conn: &ConnectionInfo, _level: Level, _message: &str, _cause: Option<&GatewayError>) {}
}

/// Callback that writes every event to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingCallback;

impl GatewayCallback for LoggingCallback {
    fn on_connection_init(&self, conn: &ConnectionInfo) {
        log!(Level::Debug, "[{}] connection accepted", conn);
    }

    fn on_all_match_miss(&self, conn: &ConnectionInfo, buf: &[u8]) {
        let preview = &buf[..buf.len().min(16)];
        log!(Level::Info, "[{}] unknown protocol, first bytes: {:02X?} ({} buffered)", conn, preview, buf.len());
    }

    fn on_protocol_matched(&self, conn: &ConnectionInfo, protocol: &str) {
        log!(Level::Debug, "[{}] protocol matched: {}", conn, protocol);
    }

    fn on_enter_default_pipeline(&self, conn: &ConnectionInfo, head: &RequestHead) {
        log!(Level::Debug, "[{}] default pipeline: {} {}", conn, head.method, head.uri);
    }

    fn on_application_dispatch(&self, conn: &ConnectionInfo, url: &str) {
        log!(Level::Debug, "[{}] dispatch {}", conn, url);
    }

    fn log(&self, conn: &ConnectionInfo, level: Level, message: &str, cause: Option<&GatewayError>) {
        match cause {
            Some(cause) => log!(level, "[{}] {}: {}", conn, message, cause),
            None => log!(level, "[{}] {}", conn, message),
        }
    }
}

/// Callback that counts events with the `metrics` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsCallback;

impl GatewayCallback for MetricsCallback {
    fn on_connection_init(&self, _conn: &ConnectionInfo) {
        counter!("gateway.connections.accepted").increment(1);
    }

    fn on_all_match_miss(&self, _conn: &ConnectionInfo, _buf: &[u8]) {
        counter!("gateway.protocol.unknown").increment(1);
    }

    fn on_protocol_matched(&self, _conn: &ConnectionInfo, protocol: &str) {
        counter!("gateway.protocol.matched", "protocol" => protocol.to_string()).increment(1);
    }

    fn on_enter_default_pipeline(&self, _conn: &ConnectionInfo, _head: &RequestHead) {
        counter!("gateway.http.default").increment(1);
    }

    fn on_application_dispatch(&self, _conn: &ConnectionInfo, _url: &str) {
        counter!("gateway.http.dispatch").increment(1);
    }
}

/// Fans every event out to several callbacks, in order
#[derive(Clone, Default)]
pub struct CompositeCallback {
    callbacks: Vec<Arc<dyn GatewayCallback>>,
}

impl CompositeCallback {
    /// Compose `callbacks`; they are invoked in the given order
    pub fn new(callbacks: Vec<Arc<dyn GatewayCallback>>) -> Self {
        Self { callbacks }
    }

    /// Append a callback
    pub fn push(&mut self, callback: Arc<dyn GatewayCallback>) {
        self.callbacks.push(callback);
    }

    /// Number of composed callbacks
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Whether no callback is composed
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

// Each callback is isolated on its own, one panicking does not starve the rest.
impl GatewayCallback for CompositeCallback {
    fn on_connection_init(&self, conn: &ConnectionInfo) {
        for callback in &self.callbacks {
            guarded("on_connection_init", || callback.on_connection_init(conn));
        }
    }

    fn on_all_match_miss(&self, conn: &ConnectionInfo, buf: &[u8]) {
        for callback in &self.callbacks {
            guarded("on_all_match_miss", || callback.on_all_match_miss(conn, buf));
        }
    }

    fn on_protocol_matched(&self, conn: &ConnectionInfo, protocol: &str) {
        for callback in &self.callbacks {
            guarded("on_protocol_matched", || callback.on_protocol_matched(conn, protocol));
        }
    }

    fn on_enter_default_pipeline(&self, conn: &ConnectionInfo, head: &RequestHead) {
        for callback in &self.callbacks {
            guarded("on_enter_default_pipeline", || callback.on_enter_default_pipeline(conn, head));
        }
    }

    fn on_application_dispatch(&self, conn: &ConnectionInfo, url: &str) {
        for callback in &self.callbacks {
            guarded("on_application_dispatch", || callback.on_application_dispatch(conn, url));
        }
    }

    fn log(&self, conn: &ConnectionInfo, level: Level, message: &str, cause: Option<&GatewayError>) {
        for callback in &self.callbacks {
            guarded("log", || callback.log(conn, level, message, cause));
        }
    }
}

/// Run a callback, swallowing and reporting a panic
fn guarded<F: FnOnce()>(event: &str, f: F) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!("Gateway callback panicked in {}: {}", event, reason);
    }
}

/// The callback as seen by the gateway internals
///
/// Cheap to clone. Every call is isolated, a panicking callback is reported
/// through `log` and otherwise ignored.
#[derive(Clone)]
pub struct CallbackSink {
    callback: Arc<dyn GatewayCallback>,
}

impl CallbackSink {
    /// Wrap a callback
    pub fn new(callback: Arc<dyn GatewayCallback>) -> Self {
        Self { callback }
    }

    /// Notify a new connection
    pub fn connection_init(&self, conn: &ConnectionInfo) {
        guarded("on_connection_init", || self.callback.on_connection_init(conn));
    }

    /// Notify that every matcher rejected the bytes
    pub fn all_match_miss(&self, conn: &ConnectionInfo, buf: &[u8]) {
        guarded("on_all_match_miss", || self.callback.on_all_match_miss(conn, buf));
    }

    /// Notify a protocol match
    pub fn protocol_matched(&self, conn: &ConnectionInfo, protocol: &str) {
        guarded("on_protocol_matched", || self.callback.on_protocol_matched(conn, protocol));
    }

    /// Notify that a request enters the default pipeline
    pub fn enter_default_pipeline(&self, conn: &ConnectionInfo, head: &RequestHead) {
        guarded("on_enter_default_pipeline", || self.callback.on_enter_default_pipeline(conn, head));
    }

    /// Notify an application dispatch
    pub fn application_dispatch(&self, conn: &ConnectionInfo, url: &str) {
        guarded("on_application_dispatch", || self.callback.on_application_dispatch(conn, url));
    }

    /// Emit a diagnostic message
    pub fn log(&self, conn: &ConnectionInfo, level: Level, message: &str) {
        guarded("log", || self.callback.log(conn, level, message, None));
    }

    /// Emit a diagnostic message with its cause
    pub fn log_error(&self, conn: &ConnectionInfo, level: Level, message: &str, cause: &GatewayError) {
        guarded("log", || self.callback.log(conn, level, message, Some(cause)));
    }
}

impl Default for CallbackSink {
    fn default() -> Self {
        Self::new(Arc::new(LoggingCallback))
    }
}
