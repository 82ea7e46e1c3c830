//! # hookscope server
//!
//! Webhook ingress + WebSocket gateway. Requests posted to
//! `/webhook/{session_id}` are normalized and pushed, in near real time, to
//! every listener subscribed to that session over `/ws/listen`.

pub mod api;
pub mod services;
pub mod workers;
pub mod ws;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::Router;
use hs_common::AppConfig;
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;

use ws::listeners::ListenerRegistry;
use ws::registry::SessionRegistry;

/// Shared application state available to all handlers.
pub struct AppState {
    pub config: AppConfig,
    /// session_id ↔ listener membership
    pub sessions: SessionRegistry,
    /// Live listener connections and their outbound queues
    pub listeners: ListenerRegistry,
}

impl AppState {
    pub fn new(config: AppConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: SessionRegistry::new(),
            listeners: ListenerRegistry::new(),
        })
    }
}

/// Build the full application router.
pub fn app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config);
    Router::new()
        .merge(api::router(state.clone()))
        .nest("/ws", ws::router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` resolves. Background workers live as long as the server.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let workers = workers::start_all_workers(state.clone());
    tracing::info!(workers = workers.len(), "Background workers started");

    let result = axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await;

    for worker in workers {
        worker.abort();
    }
    result?;
    Ok(())
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let Some(origin) = config.cors_origin() else {
        return CorsLayer::permissive();
    };
    match HeaderValue::from_str(origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true),
        Err(e) => {
            tracing::warn!(origin, error = %e, "Invalid CORS origin, allowing any origin");
            CorsLayer::permissive()
        }
    }
}
