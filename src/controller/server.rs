//! # HTTP Server
//!
//! Serves Prometheus metrics and the health probes:
//!
//! - `GET /metrics` on the metrics address
//! - `GET /healthz` and `GET /readyz` on the probe address
//!
//! `/readyz` only turns green once the watch loop is running.

use crate::observability::metrics;
use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared server state
#[derive(Debug, Clone, Default)]
pub struct ServerState {
    /// Both listeners are bound
    pub is_listening: Arc<AtomicBool>,
    /// The watch loop is running
    pub is_ready: Arc<AtomicBool>,
}

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_ready(&self) {
        self.is_ready.store(true, Ordering::Relaxed);
    }

    pub fn mark_not_ready(&self) {
        self.is_ready.store(false, Ordering::Relaxed);
    }
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::gather_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<ServerState>) -> impl IntoResponse {
    if state.is_ready.load(Ordering::Relaxed) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

/// Router for the metrics address
pub fn metrics_router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
}

/// Router for the probe address
pub fn probe_router(state: ServerState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

/// Bind both listeners and serve until the process exits
///
/// `state.is_listening` flips once both sockets are bound.
pub async fn start_server(
    metrics_addr: SocketAddr,
    probe_addr: SocketAddr,
    state: ServerState,
) -> Result<()> {
    let metrics_listener = TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("Failed to bind metrics address {metrics_addr}"))?;
    let probe_listener = TcpListener::bind(probe_addr)
        .await
        .with_context(|| format!("Failed to bind health probe address {probe_addr}"))?;

    info!("📊 Metrics server listening on {}", metrics_addr);
    info!("💓 Health probe server listening on {}", probe_addr);
    state.is_listening.store(true, Ordering::Relaxed);

    let metrics_server = axum::serve(metrics_listener, metrics_router());
    let probe_server = axum::serve(probe_listener, probe_router(state));

    tokio::try_join!(
        async { metrics_server.await.context("Metrics server failed") },
        async { probe_server.await.context("Health probe server failed") },
    )?;
    Ok(())
}
