//! # hookscope server
//!
//! Binary entry point: loads configuration, installs logging and serves the
//! relay until Ctrl+C / SIGTERM.

use hs_common::AppConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.is_production() {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    tracing::info!(mode = ?config.server.mode, "Starting hookscope server...");

    let listener =
        tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    let addr = listener.local_addr()?;

    tracing::info!("Listening on {}", addr);
    tracing::info!("Webhook endpoint: http://{}/webhook/{{sessionId}}", addr);
    tracing::info!("Listener endpoint: ws://{}{}", addr, hs_protocol::LISTEN_PATH);
    match config.cors_origin() {
        Some(origin) => tracing::info!(%origin, "CORS restricted to origin"),
        None => tracing::info!("CORS allows any origin"),
    }

    let state = hs_server::AppState::new(config);
    hs_server::serve(listener, state, shutdown_signal()).await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
