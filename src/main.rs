//! Application entry point and server initialization
//!
//! Loads configuration, connects the document store, and serves the API
//! until SIGINT or SIGTERM.

use std::sync::Arc;

use dotenvy::dotenv;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use routeshare::config::Config;
use routeshare::database::Store;
use routeshare::route::create_app;
use routeshare::state::AppState;

/// # Environment Variables
///
/// - `DATABASE_URL` - Path to the database file (required)
/// - `PORT` - Server port number (default: 3000)
/// - `RUST_LOG` - Log filter (default: "routeshare=debug,tower_http=debug")
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if it exists
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("routeshare=debug,tower_http=debug")),
        )
        .init();

    let config = Config::from_env()?;

    // The handle exists before the connection so that services can be wired
    // to it; any request reaching an unconnected store fails fast
    let store = Arc::new(Store::new());
    store.connect(&config.database_url)?;
    info!(database = %config.database_url, "document store connected");

    let app = create_app(AppState::new(store)).layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("server running at http://localhost:{}", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Resolves once the process is asked to stop (Ctrl+C, or SIGTERM on Unix)
///
/// A signal source that cannot be installed is logged and ignored rather
/// than treated as a stop request.
async fn shutdown_signal() {
    #[cfg(unix)]
    let reason = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => tokio::select! {
            reason = interrupted() => reason,
            _ = sigterm.recv() => "SIGTERM",
        },
        Err(err) => {
            warn!(error = %err, "SIGTERM handler unavailable");
            interrupted().await
        }
    };

    #[cfg(not(unix))]
    let reason = interrupted().await;

    info!(signal = reason, "shutting down, draining open connections");
}

async fn interrupted() -> &'static str {
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "Ctrl+C handler unavailable");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
