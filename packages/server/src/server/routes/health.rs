use axum::{extract::Extension, Json};
use serde::{Deserialize, Serialize};

use crate::server::app::AxumAppState;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub running_tasks: usize,
    pub max_concurrent: usize,
}

/// Health check endpoint
///
/// Liveness only: the orchestrator is in-process, so if this handler runs the
/// service is up. Reports slot usage for dashboards.
pub async fn health_handler(Extension(state): Extension<AxumAppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        running_tasks: state.orchestrator.running_count(),
        max_concurrent: state.orchestrator.config().max_concurrent,
    })
}
