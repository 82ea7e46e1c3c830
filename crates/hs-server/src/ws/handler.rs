//! Listener WebSocket gateway.
//!
//! Each connection runs one receive loop that owns a [`ListenerSession`], so
//! join/leave commands from a connection reach the registry in the order they
//! arrived. Outbound frames go through the listener's bounded queue, drained
//! by a dedicated writer task.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use hs_protocol::{ClientMessage, ServerMessage, SessionJoined, SessionLeft};
use tokio::sync::{mpsc, oneshot};

use super::listeners::{Delivery, ListenerHandle};
use super::registry::ConnectionId;
use crate::AppState;

/// How long a stale listener's writer gets to flush its Close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

// ─── Upgrade handler ─────────────────────────────────────────

/// Listener WebSocket upgrade.
pub async fn listen_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_listener_socket(socket, state))
}

// ─── Connection state machine ────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Subscribed(String),
    Disconnected,
}

/// One listener's lifecycle: `Connected` → `Subscribed(session)` → `Disconnected`.
///
/// A connection is subscribed to at most one session; joining another one
/// leaves the previous session first. Dropping the value performs disconnect
/// cleanup if it has not already run.
pub struct ListenerSession {
    state: Arc<AppState>,
    listener: Arc<ListenerHandle>,
    status: ConnectionState,
}

impl ListenerSession {
    pub fn new(state: Arc<AppState>, listener: Arc<ListenerHandle>) -> Self {
        Self {
            state,
            listener,
            status: ConnectionState::Connected,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.listener.connection_id
    }

    pub fn status(&self) -> &ConnectionState {
        &self.status
    }

    /// Apply a client command, returning the reply to send back (if any).
    pub fn handle(&mut self, command: ClientMessage) -> Option<ServerMessage> {
        match command {
            ClientMessage::JoinSession(session_id) => self.join(session_id),
            ClientMessage::LeaveSession(session_id) => self.leave(session_id),
            ClientMessage::Ping => Some(ServerMessage::Pong),
        }
    }

    fn join(&mut self, session_id: String) -> Option<ServerMessage> {
        if self.status == ConnectionState::Disconnected {
            return None;
        }
        let connection_id = self.connection_id();
        if session_id.is_empty() {
            tracing::warn!(%connection_id, "Ignoring join-session with empty session id");
            return None;
        }

        if let ConnectionState::Subscribed(previous) = &self.status {
            if *previous != session_id {
                self.state.sessions.leave(previous, connection_id);
                tracing::info!(%connection_id, session_id = %previous, "Listener left previous session");
            }
        }
        self.state.sessions.join(&session_id, connection_id);
        tracing::info!(
            %connection_id,
            %session_id,
            members = self.state.sessions.members_of(&session_id).len(),
            "Listener joined session"
        );

        self.status = ConnectionState::Subscribed(session_id.clone());
        Some(ServerMessage::SessionJoined(SessionJoined {
            session_id,
            connection_id: connection_id.to_string(),
        }))
    }

    fn leave(&mut self, session_id: String) -> Option<ServerMessage> {
        if self.status == ConnectionState::Disconnected {
            return None;
        }
        let connection_id = self.connection_id();
        if self.state.sessions.leave(&session_id, connection_id) {
            tracing::info!(%connection_id, %session_id, "Listener left session");
        }
        if self.status == ConnectionState::Subscribed(session_id.clone()) {
            self.status = ConnectionState::Connected;
        }
        Some(ServerMessage::SessionLeft(SessionLeft { session_id }))
    }

    /// Remove the connection from every session and from the listener table.
    /// Runs once; later calls are no-ops.
    pub fn disconnect(&mut self) {
        if self.status == ConnectionState::Disconnected {
            return;
        }
        self.status = ConnectionState::Disconnected;

        let connection_id = self.connection_id();
        let left = self.state.sessions.remove_connection_everywhere(connection_id);
        self.state.listeners.unregister(&connection_id);
        for session_id in &left {
            tracing::info!(%connection_id, %session_id, "Removed listener from session");
        }
    }
}

impl Drop for ListenerSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ─── Listener socket ─────────────────────────────────────────

async fn handle_listener_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<Message>(state.config.relay.listener_buffer.max(1));
    let listener = state.listeners.register(tx);
    let connection_id = listener.connection_id;
    let mut session = ListenerSession::new(state.clone(), listener.clone());

    tracing::info!(%connection_id, "Listener WebSocket connected");

    // Forward channel → WebSocket. A close request jumps the queue.
    let (close_tx, mut close_rx) = oneshot::channel::<CloseFrame>();
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                frame = &mut close_rx => {
                    if let Ok(frame) = frame {
                        let _ = ws_sender.send(Message::Close(Some(frame))).await;
                    }
                    break;
                }
                next = rx.recv() => {
                    let Some(msg) = next else { break };
                    if ws_sender.send(msg).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Receive loop
    let mut close_frame = None;
    loop {
        tokio::select! {
            _ = listener.stale() => {
                tracing::warn!(%connection_id, "Closing stale listener");
                close_frame = Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: "listener stale".into(),
                });
                break;
            }
            next = ws_receiver.next() => {
                let Some(msg) = next else {
                    tracing::info!(%connection_id, "Listener stream ended");
                    break;
                };
                listener.touch();
                match msg {
                    Ok(Message::Text(text)) => match ClientMessage::from_json(text.as_str()) {
                        Ok(command) => {
                            if let Some(reply) = session.handle(command) {
                                reply_to(&listener, &reply);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(%connection_id, error = %e, "Ignoring malformed listener message");
                        }
                    },
                    Ok(Message::Ping(data)) => {
                        let _ = listener.push(Message::Pong(data));
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::info!(%connection_id, ?frame, "Listener WebSocket closed");
                        break;
                    }
                    Ok(Message::Binary(data)) => {
                        tracing::debug!(%connection_id, bytes = data.len(), "Ignoring binary frame");
                    }
                    Ok(Message::Pong(_)) => {}
                    Err(e) => {
                        tracing::warn!(%connection_id, error = %e, "Listener WebSocket error");
                        break;
                    }
                }
            }
        }
    }

    // ── Cleanup ──────────────────────────────────────────────
    session.disconnect();
    if let Some(frame) = close_frame {
        let _ = close_tx.send(frame);
        if tokio::time::timeout(CLOSE_GRACE, &mut send_task).await.is_err() {
            tracing::debug!(%connection_id, "Close frame not flushed in time");
            send_task.abort();
        }
    } else {
        send_task.abort();
    }
    tracing::info!(
        %connection_id,
        connected_secs = (Utc::now() - listener.connected_at).num_seconds(),
        "Listener disconnected"
    );
}

fn reply_to(listener: &ListenerHandle, reply: &ServerMessage) {
    match reply.to_json() {
        Ok(text) => {
            if listener.push(Message::Text(text.into())) == Delivery::Full {
                tracing::warn!(connection_id = %listener.connection_id, "Listener buffer full on reply");
            }
        }
        Err(e) => {
            tracing::warn!(connection_id = %listener.connection_id, error = %e, "Failed to encode reply");
        }
    }
}
