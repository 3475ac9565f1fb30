//! Slow-probe guard
//!
//! A peer that sends a few bytes and then stalls keeps a connection in an
//! undecided stage forever. Each undecided stage arms a one-shot timer; when
//! it fires and the connection is still in that stage, a fatal event is posted
//! to the connection's own task, which closes it.
//!
//! Timers never own the connection. They hold a weak reference to the
//! registry plus the connection id, and the stage check is repeated on the
//! connection task when the event is handled.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::{ConnectionId, GatewayError};

/// Where a connection currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// The outer classifier is still collecting bytes
    Classifying,
    /// The HTTP sub-router is waiting for a complete request head
    HttpRouting,
    /// A pipeline owns the connection
    Handed,
}

impl Stage {
    /// Stage name
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Classifying => "classifying",
            Stage::HttpRouting => "http-routing",
            Stage::Handed => "handed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fatal event delivered to a connection task
#[derive(Debug)]
pub struct FatalEvent {
    /// Stage the event was raised for
    pub stage: Stage,
    /// What went wrong
    pub error: GatewayError,
}

struct Entry {
    stage: Stage,
    control: mpsc::UnboundedSender<FatalEvent>,
}

type Entries = Mutex<HashMap<ConnectionId, Entry>>;

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<ConnectionId, Entry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Live connections and their current stage
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    entries: Arc<Entries>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection in the `Classifying` stage
    ///
    /// Returns the owning handle and the receiver of fatal events for the
    /// connection. The entry is removed when the handle is dropped.
    pub fn register(&self, id: ConnectionId) -> (ConnectionHandle, mpsc::UnboundedReceiver<FatalEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.entries).insert(id, Entry { stage: Stage::Classifying, control: tx });

        let handle = ConnectionHandle { entries: Arc::clone(&self.entries), id };
        (handle, rx)
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Whether no connection is live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owning registry handle of one connection
pub struct ConnectionHandle {
    entries: Arc<Entries>,
    id: ConnectionId,
}

impl ConnectionHandle {
    /// Connection id
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Move the connection to another stage
    pub fn set_stage(&self, stage: Stage) {
        if let Some(entry) = lock(&self.entries).get_mut(&self.id) {
            entry.stage = stage;
        }
    }

    /// Current stage
    pub fn stage(&self) -> Option<Stage> {
        lock(&self.entries).get(&self.id).map(|entry| entry.stage)
    }

    /// Non-owning reference for timers
    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection { entries: Arc::downgrade(&self.entries), id: self.id }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        lock(&self.entries).remove(&self.id);
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle").field("id", &self.id).finish()
    }
}

/// Weak reference to a registered connection
#[derive(Clone)]
pub struct WeakConnection {
    entries: Weak<Entries>,
    id: ConnectionId,
}

impl WeakConnection {
    /// Post `error` to the connection if it is still in `stage`
    ///
    /// Returns whether the event was delivered. A connection that is gone, or
    /// that moved on to another stage, is left alone.
    pub fn raise_if_stage(&self, stage: Stage, error: GatewayError) -> bool {
        let entries = match self.entries.upgrade() {
            Some(entries) => entries,
            None => return false,
        };

        let guard = lock(&entries);
        match guard.get(&self.id) {
            Some(entry) if entry.stage == stage => entry.control.send(FatalEvent { stage, error }).is_ok(),
            _ => false,
        }
    }
}

/// One-shot slow-probe timer; dropping it cancels the timer
#[derive(Debug)]
pub struct SlowProbeGuard {
    task: JoinHandle<()>,
}

impl SlowProbeGuard {
    /// Arm a timer for `stage`
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm(conn: WeakConnection, stage: Stage, timeout: Duration) -> Self {
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;

            let error = GatewayError::SlowProbeTimeout {
                stage: stage.as_str(),
                timeout_ms: timeout.as_millis() as u64,
            };
            if conn.raise_if_stage(stage, error) {
                debug!("{} stage of {} timed out after {:?}", stage, conn.id, timeout);
            }
        });

        Self { task }
    }

    /// Cancel the timer
    pub fn disarm(self) {}
}

impl Drop for SlowProbeGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_drop_unregisters() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::next();
        let (handle, _rx) = registry.register(id);
        assert_eq!(handle.id(), id);
        assert_eq!(handle.stage(), Some(Stage::Classifying));

        handle.set_stage(Stage::HttpRouting);
        assert_eq!(handle.stage(), Some(Stage::HttpRouting));
        assert_eq!(registry.len(), 1);

        drop(handle);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_raise_checks_stage() {
        let registry = ConnectionRegistry::new();
        let (handle, mut rx) = registry.register(ConnectionId::next());
        let weak = handle.downgrade();

        handle.set_stage(Stage::Handed);
        assert!(!weak.raise_if_stage(Stage::Classifying, GatewayError::Other("late".to_string())));
        assert!(rx.try_recv().is_err());

        handle.set_stage(Stage::Classifying);
        assert!(weak.raise_if_stage(Stage::Classifying, GatewayError::Other("stalled".to_string())));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.stage, Stage::Classifying);

        drop(handle);
        assert!(!weak.raise_if_stage(Stage::Classifying, GatewayError::Other("gone".to_string())));
    }

    #[tokio::test]
    async fn test_guard_fires_once_stalled() {
        let registry = ConnectionRegistry::new();
        let (handle, mut rx) = registry.register(ConnectionId::next());
        let _guard = SlowProbeGuard::arm(handle.downgrade(), Stage::Classifying, Duration::from_millis(20));

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(event.error, GatewayError::SlowProbeTimeout { stage: "classifying", timeout_ms: 20 }));
    }

    #[tokio::test]
    async fn test_dropped_guard_never_fires() {
        let registry = ConnectionRegistry::new();
        let (handle, mut rx) = registry.register(ConnectionId::next());
        let guard = SlowProbeGuard::arm(handle.downgrade(), Stage::Classifying, Duration::from_millis(20));
        guard.disarm();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());
    }
}
