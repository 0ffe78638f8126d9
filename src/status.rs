//! Status server
//!
//! `/metrics` serves Prometheus text, `/health` is a liveness probe and
//! `/state` returns the latest controller snapshot as JSON.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::controller::{ControllerHandle, ControllerMetrics};

#[derive(Clone)]
pub struct StatusState {
    pub metrics: Arc<ControllerMetrics>,
    pub handle: ControllerHandle,
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(|| async { "OK" }))
        .route("/state", get(snapshot))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn metrics(State(state): State<StatusState>) -> String {
    state.metrics.to_prometheus()
}

async fn snapshot(State(state): State<StatusState>) -> impl IntoResponse {
    match state.handle.snapshot() {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "controller not started").into_response(),
    }
}

/// Serve until `shutdown` fires.
pub async fn serve(
    addr: SocketAddr,
    state: StatusState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind status server on {}", addr))?;
    info!("Status server listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
        .context("Status server failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{
        ControllerConfig, ControllerContext, ControllerIntegration, ControllerSnapshot,
    };

    async fn spawn(state: StatusState) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_state_unavailable_before_first_snapshot() {
        let (_integration, handle) = ControllerIntegration::new();
        let addr = spawn(StatusState {
            metrics: Arc::new(ControllerMetrics::new()),
            handle,
        })
        .await;

        let resp = reqwest::get(format!("http://{}/state", addr)).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

        let resp = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
        assert_eq!(resp.text().await.unwrap(), "OK");
    }

    #[tokio::test]
    async fn test_state_and_metrics() {
        let (integration, handle) = ControllerIntegration::new();
        let ctx = ControllerContext::new(&ControllerConfig::default(), 1200, 0);
        integration.publish(ControllerSnapshot::capture(&ctx, None));

        let metrics = Arc::new(ControllerMetrics::new());
        metrics.set_rates(1200, 0);
        let addr = spawn(StatusState { metrics, handle }).await;

        let state: serde_json::Value = reqwest::get(format!("http://{}/state", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(state["borrow_rate"], 1200);
        assert_eq!(state["mode"], "tempered");

        let body = reqwest::get(format!("http://{}/metrics", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("peg_controller_rate_bps{rate=\"borrow\"} 1200"));
    }
}
