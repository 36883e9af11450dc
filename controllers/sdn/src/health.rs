//! Health Check Endpoints
//!
//! Liveness and readiness endpoints for Kubernetes.

use crate::error::ControllerError;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone, Default)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
}

impl HealthState {
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

/// Liveness endpoint. The process answering is enough.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness endpoint. Returns OK once the watchers are running.
pub async fn readiness_check(State(state): State<HealthState>) -> Result<&'static str, StatusCode> {
    if state.is_ready() {
        Ok("READY")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/readyz", get(readiness_check))
        .with_state(state)
}

/// Serves the health routes on `bind_address` until `cancel` fires
pub async fn serve(bind_address: &str, state: HealthState, cancel: CancellationToken) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .map_err(|e| ControllerError::InvalidConfig(format!("cannot bind health endpoint {}: {}", bind_address, e)))?;
    info!("Health endpoints listening on {}", bind_address);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| ControllerError::Watch(format!("health server failed: {}", e)))
}
