//! Health check endpoint.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use hs_protocol::iso_millis;
use serde_json::{json, Value};

use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "hs-server",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": iso_millis::format(&Utc::now()),
        "activeSessions": state.sessions.session_count(),
        "listeners": state.listeners.len(),
    }))
}
