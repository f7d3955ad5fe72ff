//! Route definitions for the weather alerting service

use axum::{routing::get, Router};

use crate::{handlers, AppState};

/// Operational routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::status))
}
