//! Health Routes
//!
//! Health check endpoints for monitoring and Kubernetes probes.
//! None of them require a token.
//!
//! - GET /health/live - Liveness probe (process is alive)
//! - GET /health/ready - Readiness probe (store answers queries)
//! - GET /health - Full health status

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::state::AppState;

/// GET /health/live
///
/// Kubernetes liveness probe.
/// Returns 200 if the process is alive, no dependency checks.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready
///
/// Kubernetes readiness probe.
/// Returns 200 if the store answers a trivial query.
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    match state.with_store(|store| store.stats()).await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!("Readiness check failed: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// GET /health
///
/// Full health status with component details.
pub async fn full_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let stats = state.with_store(|store| store.stats()).await.ok();

    let (status, storage) = match stats {
        Some(_) => ("healthy", "ok"),
        None => ("unhealthy", "error"),
    };

    Json(HealthResponse {
        status: status.to_string(),
        storage: storage.to_string(),
        samples: stats.map(|s| s.samples),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
