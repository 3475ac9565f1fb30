//! Native HTTP matchers
//!
//! Requests that need a fully event-driven path (protocol upgrades, long
//! lived streams) are claimed by an `HttpMatcher` instead of going through
//! the request/response pipeline.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use http::header::UPGRADE;

use crate::common::{BoxedStream, ConnectionInfo, PrefixedStream, Result};
use crate::protocol::{CallbackSink, ConnectionHandle};

use super::codec::RequestHead;

/// Limits applied to native pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeLimits {
    /// Close the connection when the client sends nothing for this long
    pub read_idle: Duration,
    /// Close the connection when nothing is written to the client for this long
    pub write_idle: Duration,
    /// Largest message a native pipeline accepts
    pub max_message_size: usize,
}

/// What a native pipeline receives
///
/// `stream` replays every byte that followed the request head before
/// reading from the socket again.
pub struct NativeHandoff {
    /// The request that selected this pipeline
    pub head: RequestHead,
    /// Connection stream, positioned right after the request head
    pub stream: PrefixedStream<BoxedStream>,
    /// Connection description
    pub conn: ConnectionInfo,
    /// Callback sink
    pub sink: CallbackSink,
    /// Registry entry of this connection
    pub handle: ConnectionHandle,
    /// Native pipeline limits
    pub limits: NativeLimits,
    /// Read buffer size
    pub buffer_size: usize,
}

impl fmt::Debug for NativeHandoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHandoff")
            .field("method", &self.head.method)
            .field("uri", &self.head.uri)
            .field("conn", &self.conn)
            .field("limits", &self.limits)
            .finish()
    }
}

/// Predicate over a parsed request plus the pipeline serving it
pub trait HttpMatcher: Send + Sync {
    /// Matcher name, used in logs
    fn name(&self) -> &str;

    /// Whether this matcher serves the request
    fn matches(&self, head: &RequestHead) -> bool;

    /// Take the connection over
    fn install_pipeline(self: Arc<Self>, handoff: NativeHandoff) -> BoxFuture<'static, Result<()>>;
}

/// Whether the request asks for a WebSocket upgrade
pub fn is_websocket(head: &RequestHead) -> bool {
    head.headers
        .get(UPGRADE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue, Method, Version};

    #[test]
    fn test_is_websocket() {
        let mut headers = HeaderMap::new();
        headers.insert(UPGRADE, HeaderValue::from_static("WebSocket"));
        let head = RequestHead { method: Method::GET, uri: "/ws".to_string(), version: Version::HTTP_11, headers };
        assert!(is_websocket(&head));

        let head = RequestHead {
            method: Method::GET,
            uri: "/".to_string(),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
        };
        assert!(!is_websocket(&head));
    }
}
