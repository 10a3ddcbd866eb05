use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the queue is unreachable.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    pub provider: String,
    pub binary: String,
    pub pipeline: String,
    pub bucket: String,
    pub queue_healthy: bool,
}

/// GET /health -- liveness plus a configuration echo.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let queue_healthy = state.queue.ping().await.is_ok();
    let status = if queue_healthy { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        provider: state.service.provider.clone(),
        binary: state.service.binary.clone(),
        pipeline: state.service.pipeline.clone(),
        bucket: state.service.bucket.clone(),
        queue_healthy,
    })
}

/// Mount health check routes (root level only).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
