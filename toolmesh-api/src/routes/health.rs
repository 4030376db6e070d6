//! Health and metrics endpoints.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::{extract::State, Json};
use serde::Serialize;
use std::collections::HashMap;
use toolmesh_core::{HealthCheck, HealthStatus};

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub uptime_secs: u64,
    pub adapters: HashMap<String, HealthCheck>,
}

/// GET /health (public)
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let report = state.registry.health().await;
    Json(HealthResponse {
        status: report.status,
        uptime_secs: state.started_at.elapsed().as_secs(),
        adapters: report.components,
    })
}

/// GET /metrics (authenticated) - Prometheus text exposition format.
pub async fn metrics(State(state): State<AppState>) -> ApiResult<String> {
    state.metrics.encode()
}
