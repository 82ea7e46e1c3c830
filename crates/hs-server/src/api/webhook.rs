//! Webhook ingress: `ANY /webhook/{session_id}`.
//!
//! Any method is accepted. The request is normalized, broadcast to the
//! session's current listeners and acknowledged with the attempted-recipient
//! count. Sessions are never validated: posting to a session nobody listens
//! on is a successful delivery to zero listeners.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::BytesRejection, ConnectInfo, DefaultBodyLimit, OriginalUri, Path, State},
    http::{HeaderMap, Method, StatusCode},
    routing::any,
    Extension, Json, Router,
};
use bytes::Bytes;
use hs_common::{AppError, AppResult};
use hs_protocol::WebhookAck;

use crate::services::broadcast::broadcast;
use crate::services::normalizer::{normalize, InboundRequest};
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let limit = state.config.relay.max_body_bytes;
    Router::new()
        .route("/webhook/{session_id}", any(receive_webhook))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    body: Result<Bytes, BytesRejection>,
) -> AppResult<Json<WebhookAck>> {
    let body = body.map_err(|rejection| match rejection.status() {
        StatusCode::PAYLOAD_TOO_LARGE => AppError::PayloadTooLarge {
            limit: state.config.relay.max_body_bytes,
        },
        _ => AppError::BadRequest(rejection.body_text()),
    })?;

    let event = normalize(InboundRequest {
        method: &method,
        uri: &uri,
        headers: &headers,
        session_id: &session_id,
        remote_addr: connect_info.map(|Extension(ConnectInfo(addr))| addr),
        body: &body,
        trust_proxy: state.config.server.trust_proxy,
    });

    tracing::info!(
        %session_id,
        method = %event.method,
        url = %event.url,
        user_agent = event.user_agent.as_deref().unwrap_or(""),
        body_bytes = body.len(),
        "Webhook received"
    );

    let method = event.method.clone();
    let timestamp = event.time;
    let sockets_notified = broadcast(&state.sessions, &state.listeners, &session_id, event);

    Ok(Json(WebhookAck {
        received: true,
        session_id,
        method,
        timestamp,
        sockets_notified,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::ws::Message;
    use axum::http::Request;
    use hs_common::AppConfig;
    use hs_protocol::ServerMessage;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    async fn call(state: Arc<AppState>, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("host", "localhost:3000")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    fn listen(state: &Arc<AppState>, session_id: &str) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(8);
        let handle = state.listeners.register(tx);
        state.sessions.join(session_id, handle.connection_id);
        rx
    }

    #[tokio::test]
    async fn unknown_session_acknowledges_zero() {
        let state = AppState::new(AppConfig::default());
        let (status, body) = call(state.clone(), post("/webhook/nobody", r#"{"a":1}"#)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["received"], json!(true));
        assert_eq!(body["sessionId"], json!("nobody"));
        assert_eq!(body["method"], json!("POST"));
        assert_eq!(body["socketsNotified"], json!(0));
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
        assert_eq!(state.sessions.session_count(), 0);
    }

    #[tokio::test]
    async fn fans_out_to_every_listener() {
        let state = AppState::new(AppConfig::default());
        let mut first = listen(&state, "abc");
        let mut second = listen(&state, "abc");
        let mut other = listen(&state, "xyz");

        let (status, body) = call(state.clone(), post("/webhook/abc?src=test", r#"{"a":1}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["socketsNotified"], json!(2));

        for rx in [&mut first, &mut second] {
            let Some(Message::Text(text)) = rx.try_recv().ok() else {
                panic!("listener got no event");
            };
            let ServerMessage::WebhookEvent(event) = serde_json::from_str(text.as_str()).unwrap()
            else {
                panic!("wrong message kind");
            };
            assert_eq!(event.body, Some(json!({"a": 1})));
            assert_eq!(event.raw_body.as_deref(), Some(r#"{"a":1}"#));
            assert_eq!(event.url, "http://localhost:3000/webhook/abc?src=test");
            assert_eq!(
                hs_protocol::iso_millis::format(&event.time),
                body["timestamp"].as_str().unwrap()
            );
            assert!(rx.try_recv().is_err());
        }
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn any_method_is_accepted() {
        let state = AppState::new(AppConfig::default());
        for method in ["GET", "PUT", "PATCH", "DELETE"] {
            let request = Request::builder()
                .method(method)
                .uri("/webhook/abc")
                .body(Body::empty())
                .unwrap();
            let (status, body) = call(state.clone(), request).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["method"], json!(method));
        }
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let mut config = AppConfig::default();
        config.relay.max_body_bytes = 8;
        let state = AppState::new(config);

        let (status, body) = call(state, post("/webhook/abc", "0123456789abcdef")).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"]["code"], json!(413));
    }
}
