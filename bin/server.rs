// GreenReceipt - Web Server
// REST API with Axum over the shared SQLite store

use anyhow::{Context, Result};
use greenreceipt::{build_router, db, AppState, Config};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("greenreceipt=info,tower_http=info")),
        )
        .init();

    info!("🌐 GreenReceipt - Web Server v{}", greenreceipt::VERSION);

    let config = Config::from_env()?;

    // Open database (created and migrated on first run)
    let conn = db::open(&config.db_path)?;
    info!(path = ?config.db_path, "database opened");

    let state = AppState::new(conn, config.ingest.clone());
    let app = build_router(state, config.static_dir.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!("🚀 Server running on http://{}", config.bind_addr);
    if let Some(dir) = &config.static_dir {
        info!(dir = ?dir, "serving static files");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
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

    info!("shutdown signal received");
}
