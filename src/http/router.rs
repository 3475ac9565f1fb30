//! HTTP sub-router
//!
//! Second classification stage: once a connection is known to speak HTTP,
//! the first complete request head decides between a native pipeline and the
//! default request/response pipeline. Fragments seen while undecided are
//! queued and replayed, in order, to the default pipeline.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use log::Level;

use crate::common::{ConnectionInfo, GatewayError, Result};
use crate::protocol::CallbackSink;

use super::codec::{HttpFragment, RequestHead};
use super::matcher::HttpMatcher;

/// Routing state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    /// Waiting for a request head
    Collecting,
    /// A native matcher claimed the connection
    DecidedNative,
    /// The default pipeline serves the connection
    DecidedDefault,
    /// Fragments have been handed over, the router is done
    Terminal,
}

/// Routing decision
pub enum Route {
    /// Serve the connection with a native pipeline
    Native {
        /// The matcher that claimed the request
        matcher: Arc<dyn HttpMatcher>,
        /// The decisive request head
        head: RequestHead,
    },
    /// Serve the connection with the default pipeline
    Default {
        /// Queued fragments, to be processed before any newly decoded one
        replay: VecDeque<HttpFragment>,
    },
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Native { matcher, head } => f
                .debug_struct("Native")
                .field("matcher", &matcher.name())
                .field("uri", &head.uri)
                .finish(),
            Route::Default { replay } => f.debug_struct("Default").field("replay", &replay.len()).finish(),
        }
    }
}

/// Per-connection HTTP sub-router
pub struct HttpRouter {
    matchers: Arc<[Arc<dyn HttpMatcher>]>,
    queue: VecDeque<HttpFragment>,
    state: RouterState,
}

impl HttpRouter {
    /// Create a router over the ordered native matchers
    pub fn new(matchers: Arc<[Arc<dyn HttpMatcher>]>) -> Self {
        Self {
            matchers,
            queue: VecDeque::new(),
            state: RouterState::Collecting,
        }
    }

    /// Current state
    pub fn state(&self) -> RouterState {
        self.state
    }

    /// Number of queued fragments
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Feed one decoded fragment
    ///
    /// Returns the routing decision once a request head settles it.
    pub fn on_fragment(
        &mut self,
        fragment: HttpFragment,
        conn: &ConnectionInfo,
        sink: &CallbackSink,
    ) -> Result<Option<Route>> {
        if self.state != RouterState::Collecting {
            return Err(GatewayError::Other(format!(
                "http router received a fragment after routing ({:?})",
                self.state
            )));
        }

        let head = match fragment {
            HttpFragment::Head(head) => head,
            other => {
                self.queue.push_back(other);
                return Ok(None);
            }
        };

        // A new request line supersedes anything queued before it.
        self.queue.clear();
        sink.log(conn, Level::Debug, &format!("http request: {} {} {:?}", head.method, head.uri, head.version));

        if let Some(matcher) = self.matchers.iter().find(|m| m.matches(&head)) {
            sink.log(conn, Level::Debug, &format!("native http request detected: {}", matcher.name()));
            sink.protocol_matched(conn, matcher.name());
            self.state = RouterState::DecidedNative;
            return Ok(Some(Route::Native { matcher: Arc::clone(matcher), head }));
        }

        sink.enter_default_pipeline(conn, &head);
        self.queue.push_back(HttpFragment::Head(head));
        self.state = RouterState::DecidedDefault;
        Ok(Some(Route::Default { replay: std::mem::take(&mut self.queue) }))
    }

    /// Mark the fragments as handed over
    pub fn finish(&mut self) {
        self.queue.clear();
        self.state = RouterState::Terminal;
    }
}
