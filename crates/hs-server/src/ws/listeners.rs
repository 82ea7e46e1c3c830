//! Live listener connections on this server instance.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use super::registry::ConnectionId;

/// Bounded channel sender feeding a listener's socket writer task.
pub type WsSender = mpsc::Sender<Message>;

/// Outcome of a non-blocking push to a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Outbound buffer full; the listener has been marked stale.
    Full,
    /// Writer task is gone.
    Closed,
}

/// Handle kept for each connected listener.
#[derive(Debug)]
pub struct ListenerHandle {
    pub connection_id: ConnectionId,
    pub connected_at: DateTime<Utc>,
    tx: WsSender,
    stale: Notify,
    last_seen_ms: AtomicI64,
}

impl ListenerHandle {
    fn new(connection_id: ConnectionId, tx: WsSender) -> Self {
        let now = Utc::now();
        Self {
            connection_id,
            connected_at: now,
            tx,
            stale: Notify::new(),
            last_seen_ms: AtomicI64::new(now.timestamp_millis()),
        }
    }

    /// Queue a frame without waiting. A full buffer marks the listener stale.
    pub fn push(&self, msg: Message) -> Delivery {
        match self.tx.try_send(msg) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                self.mark_stale();
                Delivery::Full
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Ask the owning gateway task to close this connection.
    pub fn mark_stale(&self) {
        self.stale.notify_one();
    }

    /// Resolves once the listener has been marked stale.
    pub async fn stale(&self) {
        self.stale.notified().await;
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        self.last_seen_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Milliseconds since the last inbound activity.
    pub fn idle_millis(&self) -> i64 {
        Utc::now().timestamp_millis() - self.last_seen_ms.load(Ordering::Relaxed)
    }
}

/// All listeners currently connected, keyed by connection id.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    listeners: DashMap<ConnectionId, Arc<ListenerHandle>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly upgraded connection under a new id.
    pub fn register(&self, tx: WsSender) -> Arc<ListenerHandle> {
        let handle = Arc::new(ListenerHandle::new(Uuid::new_v4(), tx));
        self.listeners.insert(handle.connection_id, handle.clone());
        tracing::debug!(connection_id = %handle.connection_id, listeners = self.listeners.len(), "Listener registered");
        handle
    }

    pub fn unregister(&self, connection_id: &ConnectionId) -> bool {
        self.listeners.remove(connection_id).is_some()
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<Arc<ListenerHandle>> {
        self.listeners.get(connection_id).map(|l| l.clone())
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Snapshot of every connected listener.
    pub fn all(&self) -> Vec<Arc<ListenerHandle>> {
        self.listeners.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Listeners with no inbound activity for at least `timeout_ms`.
    pub fn idle(&self, timeout_ms: i64) -> Vec<Arc<ListenerHandle>> {
        self.listeners
            .iter()
            .filter(|entry| entry.value().idle_millis() >= timeout_ms)
            .map(|entry| entry.value().clone())
            .collect()
    }
}
