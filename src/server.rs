use anyhow::Result;
use axum::{routing::get, Router};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{
    config::Config,
    handlers::{self, graph::AppState},
    metrics,
    pipeline::Fetcher,
    signals::{setup_signal_handlers, ShutdownSignal},
};

/// Start the graph server
///
/// This function:
/// 1. Builds the shared scrape client
/// 2. Optionally starts the self-metrics listener
/// 3. Sets up signal handlers for graceful shutdown
/// 4. Serves requests until a shutdown signal arrives
pub async fn start_server(config: Config) -> Result<()> {
    let fetcher = Arc::new(Fetcher::new(config.fetch.clone())?);
    let app = create_router(AppState { fetcher });

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    let (shutdown_tx, signal_handle) = setup_signal_handlers();

    let metrics_task = if config.metrics.enabled {
        Some(spawn_metrics_listener(&config, shutdown_tx.subscribe()).await?)
    } else {
        None
    };

    info!("Starting promgraph on {}", addr);
    info!(
        "Fetch settings: timeout {}s, channel capacity {}",
        config.fetch.timeout_seconds, config.fetch.channel_capacity
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let mut shutdown_rx = shutdown_tx.subscribe();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("Shutdown signal received, draining connections...");
        })
        .await?;

    signal_handle.await?;
    if let Some(task) = metrics_task {
        task.await?;
    }
    info!("Server stopped gracefully");

    Ok(())
}

/// Create the router. Every path is a scrape target, so everything goes to the fallback.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .fallback(handlers::graph::handle_request)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn spawn_metrics_listener(
    config: &Config,
    mut shutdown_rx: broadcast::Receiver<ShutdownSignal>,
) -> Result<tokio::task::JoinHandle<()>> {
    let handle = Arc::new(metrics::init_metrics()?);
    let addr = SocketAddr::from((
        config.metrics.host.parse::<std::net::IpAddr>()?,
        config.metrics.port,
    ));

    let app = Router::new()
        .route("/metrics", get(handlers::metrics_handler::metrics))
        .with_state(handle);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Serving self-metrics on {}/metrics", addr);

    Ok(tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await;
        if let Err(e) = served {
            error!("Metrics listener failed: {}", e);
        }
    }))
}
