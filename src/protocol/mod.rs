//! Protocol detection module
//!
//! This module decides, from the first bytes of a connection, which protocol
//! the peer speaks and hands the connection to the pipeline serving it.
//!
//! - [`Probe`]: the built-in byte probes (HTTP, HTTP proxy, CONNECT, SOCKS5, TLS)
//! - [`Classifier`]: per-connection accumulator running the ordered matcher set
//! - [`SlowProbeGuard`]: watchdog closing connections stuck in an undecided stage
//! - [`GatewayCallback`]: observer of classification events

mod callback;
mod detector;
mod guard;
mod matcher;
mod protocols;

pub use callback::{CallbackSink, CompositeCallback, GatewayCallback, LoggingCallback, MetricsCallback};
pub use detector::{Classifier, ClassifierState, Verdict};
pub use guard::{ConnectionHandle, ConnectionRegistry, FatalEvent, SlowProbeGuard, Stage, WeakConnection};
pub use matcher::{Handoff, Inbound, MatchResult, MatcherSet, ProtocolMatcher};
pub use protocols::Probe;

#[cfg(test)]
pub(crate) use callback::tests::{PanickingCallback, RecordingCallback};
