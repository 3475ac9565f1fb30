//! Protocol classifier
//!
//! Accumulates the first bytes of a connection and runs the matcher set over
//! them until one matcher claims the connection or all of them reject it.
//! The classifier is sans-IO: the connection task feeds it messages and acts
//! on the returned verdict.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use log::Level;

use crate::common::{ConnectionInfo, GatewayError, Result};

use super::callback::CallbackSink;
use super::matcher::{Inbound, MatchResult, MatcherSet, ProtocolMatcher};

/// Classification state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierState {
    /// Still collecting bytes
    Active,
    /// A matcher claimed the connection
    Matched,
    /// The connection is being closed
    Closed,
}

/// What the connection task should do next
pub enum Verdict {
    /// Read more bytes
    Pending,
    /// Hand the connection to `matcher`, replaying `buffer` first
    Matched {
        /// The matcher that claimed the connection
        matcher: Arc<dyn ProtocolMatcher>,
        /// Every byte received so far
        buffer: Bytes,
    },
    /// No matcher accepts the bytes; close the connection
    Exhausted {
        /// Number of bytes that were inspected
        buffered: usize,
    },
}

impl std::fmt::Debug for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Pending => write!(f, "Pending"),
            Verdict::Matched { matcher, buffer } => f
                .debug_struct("Matched")
                .field("matcher", &matcher.name())
                .field("buffered", &buffer.len())
                .finish(),
            Verdict::Exhausted { buffered } => write!(f, "Exhausted({} bytes)", buffered),
        }
    }
}

/// Per-connection protocol classifier
pub struct Classifier {
    matchers: MatcherSet,
    buffer: BytesMut,
    has_data: bool,
    state: ClassifierState,
}

impl Classifier {
    /// Create a classifier over a shared matcher set
    pub fn new(matchers: MatcherSet) -> Self {
        Self {
            matchers,
            buffer: BytesMut::new(),
            has_data: false,
            state: ClassifierState::Active,
        }
    }

    /// Current state
    pub fn state(&self) -> ClassifierState {
        self.state
    }

    /// Feed one inbound message
    ///
    /// Only raw bytes are accepted; anything else is fatal for the connection.
    pub fn on_message(&mut self, message: Inbound, conn: &ConnectionInfo, sink: &CallbackSink) -> Result<Verdict> {
        let chunk = match message {
            Inbound::Bytes(chunk) => chunk,
            other => {
                let err = GatewayError::UnexpectedMessageKind(other.kind().to_string());
                sink.log_error(conn, Level::Warn, "unexpected message type for protocol detection", &err);
                self.release();
                return Err(err);
            }
        };

        if self.state != ClassifierState::Active {
            return Err(GatewayError::Other(format!(
                "protocol classifier is no longer active ({:?})",
                self.state
            )));
        }

        self.has_data = true;
        self.buffer.extend_from_slice(&chunk);

        let mut pending = false;
        for matcher in self.matchers.iter() {
            match matcher.matches(&self.buffer) {
                MatchResult::Match => {
                    self.state = ClassifierState::Matched;
                    let buffer = std::mem::take(&mut self.buffer).freeze();
                    sink.protocol_matched(conn, matcher.name());
                    return Ok(Verdict::Matched { matcher: Arc::clone(matcher), buffer });
                }
                MatchResult::Pending => pending = true,
                MatchResult::Mismatch => {}
            }
        }

        if pending {
            sink.log(conn, Level::Trace, "match pending..");
            return Ok(Verdict::Pending);
        }

        let buffered = self.buffer.len();
        sink.all_match_miss(conn, &self.buffer);
        self.release();
        Ok(Verdict::Exhausted { buffered })
    }

    /// Handle a transport failure or a fatal event
    ///
    /// A failure before any byte arrived is usually a load balancer checking
    /// the port, so it is reported at low severity.
    pub fn on_transport_error(&mut self, cause: &GatewayError, conn: &ConnectionInfo, sink: &CallbackSink) {
        if !self.has_data && cause.is_transport() {
            sink.log(conn, Level::Debug, &format!("{} before any data received", cause));
        } else {
            sink.log_error(conn, Level::Warn, "protocol detect error", cause);
        }
        self.release();
    }

    /// Handle the peer closing the connection before a decision
    pub fn on_close(&mut self, conn: &ConnectionInfo, sink: &CallbackSink) {
        if self.state == ClassifierState::Active {
            sink.log(
                conn,
                Level::Debug,
                &format!("closed during protocol detection with {} bytes buffered", self.buffer.len()),
            );
        }
        self.release();
    }

    fn release(&mut self) {
        self.buffer = BytesMut::new();
        self.state = ClassifierState::Closed;
    }
}
