//! Health and status handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::services::scheduler::StatusSnapshot;
use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub service: String,
    pub version: String,
    pub locations: Vec<String>,
    #[serde(flatten)]
    pub loops: StatusSnapshot,
}

/// Health check endpoint handler
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    // Check forecast store connectivity
    let (code, status, database) = match state.forecasts.ping().await {
        Ok(()) => (StatusCode::OK, "healthy", "connected"),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "degraded", "disconnected")
        }
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: database.to_string(),
        }),
    )
}

/// Latest collection summary and alert loop counters
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        service: state.config.collection.service_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        locations: state.config.locations.iter().map(|l| l.name.clone()).collect(),
        loops: state.status.snapshot().await,
    })
}
