//! Xcast API server
//!
//! Serves the scheduling API, the publish-now endpoint, and the dispatch
//! trigger webhook.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use libxcast::platform::x::XPlatform;
use libxcast::session::SessionMirror;
use libxcast::{Config, SessionStore, XcastService};
use xcast_server::routes::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    libxcast::logging::init_default();

    info!("Starting xcast server");

    let config = Config::load()?;

    let sessions = Arc::new(SessionStore::new());
    let platform = Arc::new(XPlatform::new(&config.platform)?);
    let service = XcastService::with_platform(
        &config,
        platform,
        Some(sessions.clone() as Arc<dyn SessionMirror>),
    )
    .await?;

    info!(database = %config.database.path, "Database ready");

    let state = Arc::new(AppState {
        service,
        sessions,
        dispatch_api_key: config.dispatch.api_key.clone(),
    });

    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(?addr, "HTTP server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Shutdown signal received");
}
