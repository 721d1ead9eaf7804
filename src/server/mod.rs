// src/server/mod.rs

//! The binary's thin transport shell (spec §6): everything HTTP/1+2,
//! VCL compilation, backend directors, the management CLI, shared-memory
//! telemetry, TLS/PROXY termination and jail/privilege separation are
//! explicitly out of scope for the cache core itself (spec §1 Non-goals)
//! and are treated here as the job of this one thin `axum`/`reqwest`
//! shell sitting in front of `crate::core`.

mod initialization;
mod metrics_server;
mod proxy;

use crate::config::Config;
use anyhow::Result;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::info;

pub async fn run(config: Config) -> Result<()> {
    let ctx = initialization::setup(config).await?;
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let mut background = JoinSet::new();
    if ctx.config.metrics.enabled {
        let metrics_rx = shutdown_tx.subscribe();
        let metrics_port = ctx.config.metrics.port;
        background.spawn(metrics_server::run(metrics_port, metrics_rx));
    }

    let local_addr = ctx.listener.local_addr()?;
    info!(addr = %local_addr, "quaywatch proxy listening");

    let app = proxy::router(ctx.state);
    axum::serve(ctx.listener, app)
        .with_graceful_shutdown(await_shutdown_signal(shutdown_tx))
        .await?;

    background.shutdown().await;
    Ok(())
}

/// Waits for Ctrl+C or, on Unix, SIGTERM, then broadcasts shutdown to every
/// background task (the metrics exporter today; future ambient background
/// work can subscribe the same way).
async fn await_shutdown_signal(tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining background tasks");
    let _ = tx.send(());
}
