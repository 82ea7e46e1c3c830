//! Fan-out of webhook events to the listeners subscribed to a session.

use axum::extract::ws::Message;
use hs_protocol::{ServerMessage, WebhookEvent};

use crate::ws::listeners::{Delivery, ListenerRegistry};
use crate::ws::registry::SessionRegistry;

/// Push `event` to every connection in the membership snapshot of `session_id`.
///
/// Delivery is a non-blocking queue push per recipient; a full or closed queue
/// is logged and skipped without affecting the others. Returns the number of
/// recipients attempted.
pub fn broadcast(
    sessions: &SessionRegistry,
    listeners: &ListenerRegistry,
    session_id: &str,
    event: WebhookEvent,
) -> usize {
    let members = sessions.members_of(session_id);
    if members.is_empty() {
        tracing::debug!(session_id, "No listeners subscribed, event dropped");
        return 0;
    }

    let attempted = members.len();
    let text = match ServerMessage::WebhookEvent(Box::new(event)).to_json() {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(session_id, recipients = attempted, error = %e, "Failed to encode webhook event");
            return attempted;
        }
    };
    let frame = Message::Text(text.into());

    let mut delivered = 0usize;
    for connection_id in &members {
        let Some(listener) = listeners.get(connection_id) else {
            tracing::debug!(session_id, %connection_id, "Listener vanished before delivery");
            continue;
        };
        match listener.push(frame.clone()) {
            Delivery::Queued => delivered += 1,
            Delivery::Full => {
                tracing::warn!(session_id, %connection_id, "Listener buffer full, disconnecting as stale");
            }
            Delivery::Closed => {
                tracing::debug!(session_id, %connection_id, "Listener writer closed, skipping");
            }
        }
    }

    tracing::debug!(
        session_id,
        recipients = attempted,
        delivered,
        "Broadcast webhook event"
    );
    attempted
}
