//! HTTP routes: webhook ingress and health.

mod health;
mod webhook;

use crate::AppState;
use axum::Router;
use std::sync::Arc;

/// Build the HTTP router with all sub-routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(webhook::router(state.clone()))
        .merge(health::router(state))
}
