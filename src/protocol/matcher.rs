//! Matcher abstractions
//!
//! A matcher looks at the bytes accumulated so far on a connection and
//! decides whether they belong to its protocol. Matchers are stateless and
//! shared by every connection, so they only ever see a read-only view.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::common::{BoxedStream, ConnectionInfo, GatewayError, PrefixedStream, Result};
use crate::http::HttpFragment;

use super::callback::CallbackSink;
use super::guard::{ConnectionHandle, FatalEvent};

/// Outcome of probing the accumulated bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    /// The bytes belong to this protocol
    Match,
    /// The bytes can never belong to this protocol
    Mismatch,
    /// Not enough bytes yet to tell
    Pending,
}

/// A message delivered to a connection stage
#[derive(Debug)]
pub enum Inbound {
    /// Raw bytes read from the socket
    Bytes(Bytes),
    /// A decoded HTTP fragment
    Http(HttpFragment),
}

impl Inbound {
    /// Short name of the message kind, used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Inbound::Bytes(_) => "bytes",
            Inbound::Http(_) => "http fragment",
        }
    }
}

/// Everything a pipeline needs to take a classified connection over
///
/// The stream replays the accumulated classification buffer before any new
/// socket data, so the pipeline sees the connection from its first byte.
pub struct Handoff {
    /// Connection stream, accumulated bytes first
    pub stream: PrefixedStream<BoxedStream>,
    /// Connection description
    pub conn: ConnectionInfo,
    /// Callback sink
    pub sink: CallbackSink,
    /// Registry entry of this connection; dropping it unregisters the connection
    pub handle: ConnectionHandle,
    /// Fatal events raised for this connection (slow-probe timeouts)
    pub control: mpsc::UnboundedReceiver<FatalEvent>,
    /// Read buffer size
    pub buffer_size: usize,
}

impl fmt::Debug for Handoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handoff")
            .field("conn", &self.conn)
            .field("replay", &self.stream.pending_prefix().len())
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}

/// A protocol probe plus the pipeline that serves the protocol
pub trait ProtocolMatcher: Send + Sync {
    /// Protocol name, used in logs and metrics
    fn name(&self) -> &str;

    /// Probe the accumulated bytes, always starting at offset 0
    ///
    /// Must be cheap and must not block.
    fn matches(&self, buf: &[u8]) -> MatchResult;

    /// Take the connection over
    ///
    /// Called exactly once per matched connection. The returned future owns
    /// the connection until it completes.
    fn install_pipeline(self: Arc<Self>, handoff: Handoff) -> BoxFuture<'static, Result<()>>;
}

/// The ordered, immutable matcher list shared by all connections
#[derive(Clone)]
pub struct MatcherSet {
    matchers: Arc<[Arc<dyn ProtocolMatcher>]>,
}

impl MatcherSet {
    /// Build a set with the built-in HTTP matcher first and `extensions` after it
    pub fn new(http: Arc<dyn ProtocolMatcher>, extensions: Vec<Arc<dyn ProtocolMatcher>>) -> Self {
        let mut matchers = Vec::with_capacity(extensions.len() + 1);
        matchers.push(http);
        matchers.extend(extensions);
        Self { matchers: matchers.into() }
    }

    /// Build a set from an explicit order
    ///
    /// Fails when `matchers` is empty, a classifier with nothing to try is
    /// a configuration mistake.
    pub fn from_ordered(matchers: Vec<Arc<dyn ProtocolMatcher>>) -> Result<Self> {
        if matchers.is_empty() {
            return Err(GatewayError::Config("No matcher for protocol detection".to_string()));
        }
        Ok(Self { matchers: matchers.into() })
    }

    /// Matchers in evaluation order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ProtocolMatcher>> {
        self.matchers.iter()
    }

    /// Matcher names in evaluation order
    pub fn names(&self) -> Vec<String> {
        self.matchers.iter().map(|m| m.name().to_string()).collect()
    }

    /// Number of matchers
    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

impl fmt::Debug for MatcherSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Matcher answering from a fixed byte prefix, for tests
    pub(crate) struct PrefixMatcher {
        pub name: &'static str,
        pub prefix: &'static [u8],
    }

    impl ProtocolMatcher for PrefixMatcher {
        fn name(&self) -> &str {
            self.name
        }

        fn matches(&self, buf: &[u8]) -> MatchResult {
            let n = buf.len().min(self.prefix.len());
            if buf[..n] != self.prefix[..n] {
                MatchResult::Mismatch
            } else if n < self.prefix.len() {
                MatchResult::Pending
            } else {
                MatchResult::Match
            }
        }

        fn install_pipeline(self: Arc<Self>, _handoff: Handoff) -> BoxFuture<'static, Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn test_builtin_matcher_stays_first() {
        let http: Arc<dyn ProtocolMatcher> = Arc::new(PrefixMatcher { name: "http", prefix: b"GET " });
        let other: Arc<dyn ProtocolMatcher> = Arc::new(PrefixMatcher { name: "other", prefix: b"GET" });
        let set = MatcherSet::new(http, vec![other]);
        assert_eq!(set.names(), vec!["http".to_string(), "other".to_string()]);
    }

    #[test]
    fn test_empty_set_rejected() {
        assert!(MatcherSet::from_ordered(Vec::new()).is_err());
    }
}
