//! Per-cycle metrics recorder
//!
//! Counts what happened during one collection cycle and turns it into a
//! [`CycleSummary`] at the end. Persisting the summary is best effort.

use std::time::Duration;

use chrono::{DateTime, Utc};
use shared::{CycleStatus, CycleSummary};
use uuid::Uuid;

use crate::store::MetricsSink;

/// Accumulates counters and timings across one collection cycle
#[derive(Debug, Clone)]
pub struct CycleMetrics {
    service: String,
    started_at: DateTime<Utc>,
    locations_processed: u32,
    locations_failed: u32,
    api_calls: u32,
    api_errors: u32,
    validation_failures: u32,
    successful_updates: u32,
    failed_updates: u32,
    api_durations: Vec<Duration>,
    db_durations: Vec<Duration>,
    store_lost: bool,
}

impl CycleMetrics {
    pub fn start(service: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            service: service.into(),
            started_at,
            locations_processed: 0,
            locations_failed: 0,
            api_calls: 0,
            api_errors: 0,
            validation_failures: 0,
            successful_updates: 0,
            failed_updates: 0,
            api_durations: Vec::new(),
            db_durations: Vec::new(),
            store_lost: false,
        }
    }

    /// One timed provider request
    pub fn record_api_call(&mut self, duration: Duration) {
        self.api_calls += 1;
        self.api_durations.push(duration);
    }

    /// A location whose fetch ended in terminal failure
    pub fn record_api_error(&mut self) {
        self.api_errors += 1;
    }

    /// A rejected payload. Counts as a fetch failure too.
    pub fn record_validation_failure(&mut self) {
        self.validation_failures += 1;
        self.api_errors += 1;
    }

    /// One timed store round trip
    pub fn record_db_call(&mut self, duration: Duration) {
        self.db_durations.push(duration);
    }

    pub fn record_updates(&mut self, successful: usize, failed: usize) {
        self.successful_updates += successful as u32;
        self.failed_updates += failed as u32;
    }

    pub fn record_location(&mut self, succeeded: bool) {
        self.locations_processed += 1;
        if !succeeded {
            self.locations_failed += 1;
        }
    }

    /// The store became unreachable during the cycle
    pub fn record_store_lost(&mut self) {
        self.store_lost = true;
    }

    pub fn status(&self) -> CycleStatus {
        if self.store_lost {
            CycleStatus::Failed
        } else if self.locations_failed > 0 || self.failed_updates > 0 {
            CycleStatus::Partial
        } else {
            CycleStatus::Ok
        }
    }

    /// Compute averages and produce the summary document
    pub fn finish(&self) -> CycleSummary {
        CycleSummary {
            id: Uuid::new_v4(),
            service: self.service.clone(),
            timestamp: self.started_at,
            status: self.status(),
            locations_processed: self.locations_processed,
            api_calls: self.api_calls,
            api_errors: self.api_errors,
            validation_failures: self.validation_failures,
            successful_updates: self.successful_updates,
            failed_updates: self.failed_updates,
            avg_api_time_ms: average_ms(&self.api_durations),
            avg_db_time_ms: average_ms(&self.db_durations),
        }
    }
}

fn average_ms(durations: &[Duration]) -> f64 {
    if durations.is_empty() {
        return 0.0;
    }
    let total: Duration = durations.iter().sum();
    total.as_secs_f64() * 1000.0 / durations.len() as f64
}

/// Persist a summary, logging instead of failing
pub async fn persist_summary(sink: &dyn MetricsSink, summary: &CycleSummary) {
    match sink.persist(summary).await {
        Ok(()) => tracing::debug!("Cycle summary {} persisted", summary.id),
        Err(e) => tracing::warn!("Failed to persist cycle summary {}: {}", summary.id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use async_trait::async_trait;
    use chrono::TimeZone;

    fn started() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    struct BrokenSink;

    #[async_trait]
    impl MetricsSink for BrokenSink {
        async fn persist(&self, _summary: &CycleSummary) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("metrics collection is down".to_string()))
        }
    }

    #[test]
    fn test_averages() {
        let mut metrics = CycleMetrics::start("weather_collector", started());
        metrics.record_api_call(Duration::from_millis(100));
        metrics.record_api_call(Duration::from_millis(300));
        metrics.record_db_call(Duration::from_millis(10));

        let summary = metrics.finish();
        assert_eq!(summary.api_calls, 2);
        assert!((summary.avg_api_time_ms - 200.0).abs() < 1e-9);
        assert!((summary.avg_db_time_ms - 10.0).abs() < 1e-9);
        assert_eq!(summary.timestamp, started());
        assert_eq!(summary.service, "weather_collector");
    }

    #[test]
    fn test_empty_cycle() {
        let summary = CycleMetrics::start("weather_collector", started()).finish();
        assert_eq!(summary.avg_api_time_ms, 0.0);
        assert_eq!(summary.status, CycleStatus::Ok);
    }

    #[test]
    fn test_status_derivation() {
        let mut metrics = CycleMetrics::start("weather_collector", started());
        metrics.record_location(true);
        assert_eq!(metrics.status(), CycleStatus::Ok);

        metrics.record_validation_failure();
        metrics.record_location(false);
        assert_eq!(metrics.status(), CycleStatus::Partial);
        assert_eq!(metrics.finish().api_errors, 1);

        metrics.record_store_lost();
        assert_eq!(metrics.status(), CycleStatus::Failed);
    }

    #[tokio::test]
    async fn test_persist_failure_is_swallowed() {
        let summary = CycleMetrics::start("weather_collector", started()).finish();
        persist_summary(&BrokenSink, &summary).await;
    }
}
