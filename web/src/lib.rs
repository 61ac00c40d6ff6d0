use axum::http::{HeaderValue, Method};
use axum::Router;
use hub::HubHandle;
use log::*;
use service::config::Config;
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::task::TaskTracker;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

mod controller;
pub mod error;
mod router;
mod ws;

use error::{Error, Result};

/// How long upgraded connections get to flush their close frames once the
/// HTTP server has stopped.
const CONNECTION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub hub: HubHandle,
    // Upgraded WebSocket connections, which outlive axum's graceful shutdown
    pub connections: TaskTracker,
}

impl AppState {
    pub fn new(app_config: Config, hub: HubHandle) -> Self {
        Self {
            config: app_config,
            hub,
            connections: TaskTracker::new(),
        }
    }
}

/// Binds the configured address and serves until Ctrl-C is received.
pub async fn init_server(app_state: AppState) -> Result<()> {
    let listen_addr = app_state.config.address();
    let listener = TcpListener::bind(&listen_addr).await?;

    serve(listener, app_state, shutdown_signal()).await
}

/// Serves the router on `listener` until `shutdown` resolves. The hub is told
/// to stop as soon as the signal fires, and `serve` only returns once every
/// upgraded connection has finished (or `CONNECTION_DRAIN_TIMEOUT` passes), so
/// clients receive their close frame before the runtime goes away.
pub async fn serve<F>(listener: TcpListener, app_state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let hub = app_state.hub.clone();
    let connections = app_state.connections.clone();
    let app = app(app_state)?;
    let local_addr = listener.local_addr()?;

    info!("Chat server listening on {local_addr}");
    info!("WebSocket endpoint: ws://{local_addr}/ws");
    info!("Health check endpoint: http://{local_addr}/healthz");

    let graceful = async move {
        shutdown.await;
        info!("Shutting down, closing client connections");
        if let Err(e) = hub.shutdown().await {
            warn!("Hub was already stopped: {e}");
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(graceful)
        .await?;

    connections.close();
    info!("Waiting for {} open connection(s) to close", connections.len());
    if tokio::time::timeout(CONNECTION_DRAIN_TIMEOUT, connections.wait())
        .await
        .is_err()
    {
        warn!(
            "{} connection(s) still open after {CONNECTION_DRAIN_TIMEOUT:?}",
            connections.len()
        );
    }

    Ok(())
}

/// The full application: routes wrapped in the CORS policy from `Config`.
pub fn app(app_state: AppState) -> Result<Router> {
    let cors_layer = cors_layer(&app_state.config)?;
    Ok(router::define_routes(app_state).layer(cors_layer))
}

fn cors_layer(config: &Config) -> Result<CorsLayer> {
    let origins = config
        .allowed_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|e| Error::invalid_origin(origin, e))
        })
        .collect::<Result<Vec<HeaderValue>>>()?;

    info!("Allowed CORS origins: {:?}", config.allowed_origins);

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {e}");
        // Without a signal handler keep serving until the process is killed
        std::future::pending::<()>().await;
    }
}
