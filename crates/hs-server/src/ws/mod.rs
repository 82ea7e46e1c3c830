//! WebSocket gateway for webhook listeners.

mod handler;
pub mod listeners;
pub mod registry;

pub use handler::{ConnectionState, ListenerSession};

use crate::AppState;
use axum::Router;
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/listen", axum::routing::get(handler::listen_ws_handler))
        .with_state(state)
}
