//! Admin HTTP endpoints.
//!
//! Provides endpoints for:
//! - Liveness probes: `/health`, `/healthz`
//! - Readiness probes: `/ready`, `/readyz`
//! - Prometheus metrics: `/metrics`

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use query_frontend::{FrontendMetrics, WorkerPool};
use serde_json::{json, Value};

#[derive(Clone)]
pub struct AdminState {
    pub metrics: Arc<FrontendMetrics>,
    pub pool: Arc<WorkerPool>,
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Liveness probe handler. Always OK while the process runs.
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness probe handler. Ready once at least one scheduler worker is up.
async fn ready_handler(State(state): State<AdminState>) -> (StatusCode, Json<Value>) {
    let workers = state.pool.worker_count();
    if workers > 0 {
        (
            StatusCode::OK,
            Json(json!({ "status": "ready", "workers": workers })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "no scheduler workers", "workers": 0 })),
        )
    }
}

/// Prometheus text exposition of the frontend metrics.
async fn metrics_handler(State(state): State<AdminState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.render(),
    )
}
