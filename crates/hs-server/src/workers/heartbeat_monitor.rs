//! Heartbeat monitor: keeps healthy listeners alive and drops silent ones.
//!
//! Every `relay.heartbeat_interval_secs` it marks stale each listener whose
//! last inbound frame is older than `relay.idle_timeout_secs`, then queues a
//! WebSocket Ping to every other listener. A live peer answers with a Pong,
//! which counts as inbound activity, so only dead peers reach the timeout.
//! Stale listeners are closed by their gateway task.

use std::sync::Arc;

use axum::extract::ws::Message;
use bytes::Bytes;
use tokio::task::JoinHandle;

use crate::ws::listeners::Delivery;
use crate::AppState;

/// Spawn the monitor, or return `None` when idle timeouts are disabled.
pub fn start(state: Arc<AppState>) -> Option<JoinHandle<()>> {
    let interval_secs = state.config.relay.heartbeat_interval_secs.max(1);
    let timeout_secs = state.config.relay.idle_timeout_secs;
    if timeout_secs == 0 {
        tracing::info!("Heartbeat monitor disabled (idle timeout is 0)");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));

        tracing::info!(
            "Heartbeat monitor started (every {}s, timeout {}s)",
            interval_secs,
            timeout_secs
        );

        loop {
            interval.tick().await;
            let dropped = sweep(&state, timeout_secs);
            if dropped > 0 {
                tracing::info!(count = dropped, "Heartbeat monitor: dropped idle listeners");
            }
            let pinged = ping_all(&state, timeout_secs);
            tracing::trace!(count = pinged, "Heartbeat monitor: pinged listeners");
        }
    }))
}

fn timeout_millis(timeout_secs: u64) -> i64 {
    i64::try_from(timeout_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}

/// Mark every idle listener stale. Returns how many were marked.
pub fn sweep(state: &AppState, timeout_secs: u64) -> usize {
    let idle = state.listeners.idle(timeout_millis(timeout_secs));
    for listener in &idle {
        tracing::debug!(
            connection_id = %listener.connection_id,
            idle_ms = listener.idle_millis(),
            connected_at = %listener.connected_at,
            "Listener idle past timeout"
        );
        listener.mark_stale();
    }
    idle.len()
}

/// Queue a Ping to every listener still inside the idle window.
/// Returns how many pings were queued.
pub fn ping_all(state: &AppState, timeout_secs: u64) -> usize {
    let timeout_ms = timeout_millis(timeout_secs);
    let mut pinged = 0;
    for listener in state.listeners.all() {
        if listener.idle_millis() >= timeout_ms {
            continue;
        }
        match listener.push(Message::Ping(Bytes::new())) {
            Delivery::Queued => pinged += 1,
            Delivery::Full => {
                tracing::warn!(connection_id = %listener.connection_id, "Listener buffer full on heartbeat");
            }
            Delivery::Closed => {}
        }
    }
    pinged
}
