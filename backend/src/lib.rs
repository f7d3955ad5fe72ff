//! Weather alerting service
//!
//! Collects hourly forecasts for a fixed set of locations, keeps them in a
//! deduplicated store and notifies subscribers when their thresholds are
//! crossed.

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

pub mod config;
pub mod error;
pub mod external;
pub mod handlers;
pub mod routes;
pub mod services;
pub mod store;

pub use config::Config;

use services::StatusBoard;
use store::ForecastStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub forecasts: Arc<dyn ForecastStore>,
    pub status: Arc<StatusBoard>,
    pub config: Arc<Config>,
}

/// Create the application router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .merge(routes::api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Root endpoint
async fn root() -> &'static str {
    "Weather Alerts Service v1.0"
}
