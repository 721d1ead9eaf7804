// src/server/metrics_server.rs

//! A small standalone axum server exposing the Prometheus text-format
//! metrics registered in `crate::core::metrics`, run on its own port
//! alongside the proxy listener when `metrics.enabled` (spec §6 ambient
//! concerns: observability is carried regardless of the Non-goal scoping
//! out a full telemetry/VCL-style management surface).

use crate::core::metrics::gather_metrics;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tracing::{error, info};

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}

pub async fn run(port: u16, mut shutdown_rx: broadcast::Receiver<()>) {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind metrics listener on port {port}: {err}");
            return;
        }
    };
    info!("metrics exporter listening on http://{addr}/metrics");

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
    {
        error!("metrics server error: {err}");
    }
}
