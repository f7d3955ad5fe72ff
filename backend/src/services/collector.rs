//! Forecast collection cycle
//!
//! Fetch, validate, synchronize, record metrics. Locations are processed one
//! at a time with a fixed pause between provider requests.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use shared::{validate_forecast_payload, CycleSummary, ForecastBatch, Location};

use crate::error::CollectError;
use crate::external::{parse_forecast_batch, ForecastSource};
use crate::services::metrics::{persist_summary, CycleMetrics};
use crate::services::sync::ForecastSynchronizer;
use crate::store::MetricsSink;

/// Runs collection cycles over the configured locations
#[derive(Clone)]
pub struct CollectionService {
    source: Arc<dyn ForecastSource>,
    synchronizer: ForecastSynchronizer,
    metrics_sink: Arc<dyn MetricsSink>,
    locations: Vec<Location>,
    request_pause: Duration,
    service_name: String,
}

impl CollectionService {
    pub fn new(
        source: Arc<dyn ForecastSource>,
        synchronizer: ForecastSynchronizer,
        metrics_sink: Arc<dyn MetricsSink>,
        locations: Vec<Location>,
    ) -> Self {
        Self {
            source,
            synchronizer,
            metrics_sink,
            locations,
            request_pause: Duration::from_secs(1),
            service_name: "weather_collector".to_string(),
        }
    }

    pub fn with_request_pause(mut self, pause: Duration) -> Self {
        self.request_pause = pause;
        self
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Run one full cycle and return its summary.
    ///
    /// Never fails: every fault is logged and counted. Losing the forecast
    /// store stops the cycle early and marks it failed.
    pub async fn run_cycle(&self, started_at: DateTime<Utc>) -> CycleSummary {
        tracing::info!("Collection cycle started for {} locations", self.locations.len());
        let mut metrics = CycleMetrics::start(self.service_name.clone(), started_at);

        for (index, location) in self.locations.iter().enumerate() {
            if index > 0 && !self.request_pause.is_zero() {
                tokio::time::sleep(self.request_pause).await;
            }

            let batch = match self.fetch_batch(location, &mut metrics).await {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::warn!("Skipping {} this cycle: {}", location.name, e);
                    metrics.record_location(false);
                    continue;
                }
            };

            match self.synchronizer.synchronize(&batch, Utc::now()).await {
                Ok(report) => {
                    for duration in &report.db_durations {
                        metrics.record_db_call(*duration);
                    }
                    metrics.record_updates(report.applied(), report.failed);
                    metrics.record_location(report.failed == 0);
                }
                Err(e) => {
                    tracing::error!("Aborting collection cycle, forecast store lost: {}", e);
                    metrics.record_store_lost();
                    metrics.record_location(false);
                    break;
                }
            }
        }

        let summary = metrics.finish();
        persist_summary(self.metrics_sink.as_ref(), &summary).await;

        tracing::info!(
            "Collection cycle finished ({}): {} locations, {} API calls, {} errors, {} updates",
            summary.status.as_str(),
            summary.locations_processed,
            summary.api_calls,
            summary.api_errors,
            summary.successful_updates
        );

        summary
    }

    /// Fetch and validate one location. Attempt timings are recorded either way.
    async fn fetch_batch(
        &self,
        location: &Location,
        metrics: &mut CycleMetrics,
    ) -> Result<ForecastBatch, CollectError> {
        let outcome = self.source.fetch(location).await;
        for duration in &outcome.attempt_durations {
            metrics.record_api_call(*duration);
        }

        let payload = match outcome.into_result() {
            Ok(payload) => payload,
            Err(e) => {
                metrics.record_api_error();
                return Err(e.into());
            }
        };

        let parsed = validate_forecast_payload(&payload)
            .and_then(|()| parse_forecast_batch(location, &payload, Utc::now()));

        parsed.map_err(|e| {
            metrics.record_validation_failure();
            CollectError::from(e)
        })
    }
}
