//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics  Prometheus text format
//!   GET /healthz  Liveness probe (always 200 if process is running)
//!   GET /readyz   Readiness probe (200 if the backing directory is usable)

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use hpfs_storage::BackingStore;
use prometheus_client::{encoding::text::encode, registry::Registry};
use std::sync::Arc;

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct HealthState {
    pub registry: Arc<Registry>,
    pub store: BackingStore,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

/// Serve Prometheus metrics and health endpoints on `addr` (e.g. "127.0.0.1:9110")
pub async fn serve(addr: String, state: HealthState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz, /readyz");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let mut body = String::new();
    match encode(&mut body, &state.registry) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness probe: returns 200 if the process is running.
async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe: returns 200 if the backing directory is readable, 503 otherwise.
async fn readyz_handler(State(state): State<HealthState>) -> impl IntoResponse {
    match hpfs_storage::check_health(&state.store).await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(e) => {
            tracing::warn!("readiness check failed: {e}");
            (StatusCode::SERVICE_UNAVAILABLE, "backing store unavailable")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpfs_cache::CacheStats;

    async fn get_status(state: HealthState, path: &str) -> (StatusCode, String) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router(state)).await });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let request =
            format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        let code: u16 = response
            .split_whitespace()
            .nth(1)
            .and_then(|c| c.parse().ok())
            .unwrap();
        (StatusCode::from_u16(code).unwrap(), response)
    }

    fn state(root: &std::path::Path) -> HealthState {
        let mut registry = Registry::default();
        CacheStats::default().register(&mut registry);
        HealthState {
            registry: Arc::new(registry),
            store: BackingStore::new(root),
        }
    }

    #[tokio::test]
    async fn metrics_exposes_cache_counters() {
        let dir = tempfile::tempdir().unwrap();
        let (code, body) = get_status(state(dir.path()), "/metrics").await;
        assert_eq!(code, StatusCode::OK);
        assert!(body.contains("hpfs_cache_gets_total"));
    }

    #[tokio::test]
    async fn readyz_tracks_the_backing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (code, _) = get_status(state(dir.path()), "/readyz").await;
        assert_eq!(code, StatusCode::OK);

        let (code, _) = get_status(state(&dir.path().join("missing")), "/readyz").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);

        let (code, _) = get_status(state(dir.path()), "/healthz").await;
        assert_eq!(code, StatusCode::OK);
    }
}
