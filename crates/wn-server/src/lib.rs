//! wn-server: HTTP ingest API, job queue and worker pool.
//!
//! This crate ties the other wn-* crates into a running service. It provides:
//!
//! - Axum-based HTTP API accepting multipart uploads
//! - Bounded job queue drained by a fixed worker pool
//! - In-process single-flight so identical concurrent uploads share one
//!   transcode
//! - Graceful shutdown via signal handling

pub mod context;
pub mod error;
pub mod flight;
pub mod ingest;
pub mod middleware;
pub mod queue;
pub mod router;
pub mod routes;
pub mod stats;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use wn_av::{FfmpegTranscoder, ToolRegistry, Transcoder};
use wn_core::config::Config;

use crate::context::AppContext;

/// Start the wavnorm server.
///
/// Discovers ffmpeg, builds the [`AppContext`] (store, queue, workers) and
/// serves HTTP until a shutdown signal arrives. In-flight requests are
/// allowed to finish before the workers are stopped.
pub async fn start(config: Config) -> wn_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    // Discover external tools.
    let tools = Arc::new(ToolRegistry::discover(&config.tools));
    for info in tools.check_all().await {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}; uploads will fail until it is installed", info.name);
        }
    }
    let transcoder: Arc<dyn Transcoder> = Arc::new(FfmpegTranscoder::new(tools));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| wn_core::Error::Internal(format!("Invalid server address: {e}")))?;

    let workers_cancel = CancellationToken::new();
    let (ctx, pool) = AppContext::build(config, transcoder, workers_cancel.clone()).await?;
    let app = router::build_router(ctx);

    tracing::info!("Starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| wn_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;

    let shutdown = CancellationToken::new();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    // Every request has been answered; nothing is waiting on the queue.
    workers_cancel.cancel();
    pool.join().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM) or for `cancel` to fire.
pub async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
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
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
