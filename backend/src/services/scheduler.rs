//! Periodic loops
//!
//! The collection loop and the alert loop run as independent tasks on fixed
//! intervals. A shutdown signal is only observed between ticks, so a cycle
//! that has started always runs to completion.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::CycleSummary;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::services::alert::{AlertCycleReport, AlertEvaluator};
use crate::services::collector::CollectionService;

/// What `/status` reports
#[derive(Debug, Default, Clone, Serialize)]
pub struct StatusSnapshot {
    pub collection_cycles: u64,
    pub last_collection: Option<CycleSummary>,
    pub alert_ticks: u64,
    pub last_alert_tick_at: Option<DateTime<Utc>>,
    pub last_alert_report: Option<AlertCycleReport>,
}

/// Latest loop results, shared with the HTTP surface
#[derive(Debug, Default)]
pub struct StatusBoard {
    inner: RwLock<StatusSnapshot>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        self.inner.read().await.clone()
    }

    pub async fn record_collection(&self, summary: CycleSummary) {
        let mut status = self.inner.write().await;
        status.collection_cycles += 1;
        status.last_collection = Some(summary);
    }

    pub async fn record_alert_tick(&self, at: DateTime<Utc>, report: AlertCycleReport) {
        let mut status = self.inner.write().await;
        status.alert_ticks += 1;
        status.last_alert_tick_at = Some(at);
        status.last_alert_report = Some(report);
    }
}

fn interval(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Spawn the collection loop. The first cycle starts immediately.
pub fn spawn_collection_loop(
    service: CollectionService,
    period: Duration,
    status: Arc<StatusBoard>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        tracing::info!("Collection loop running every {:?}", period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let summary = service.run_cycle(Utc::now()).await;
                    status.record_collection(summary).await;
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Collection loop stopped");
    })
}

/// Spawn the alert loop
pub fn spawn_alert_loop(
    evaluator: Arc<AlertEvaluator>,
    period: Duration,
    status: Arc<StatusBoard>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        tracing::info!("Alert loop running every {:?}", period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Utc::now();
                    let report = evaluator.run_cycle(now).await;
                    status.record_alert_tick(now, report).await;
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Alert loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use shared::CycleStatus;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_status_board_counts() {
        let board = StatusBoard::new();
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        board
            .record_collection(CycleSummary {
                id: Uuid::new_v4(),
                service: "weather_collector".to_string(),
                timestamp: at,
                status: CycleStatus::Ok,
                locations_processed: 2,
                api_calls: 2,
                api_errors: 0,
                validation_failures: 0,
                successful_updates: 80,
                failed_updates: 0,
                avg_api_time_ms: 120.0,
                avg_db_time_ms: 4.0,
            })
            .await;
        board.record_alert_tick(at, AlertCycleReport::default()).await;
        board.record_alert_tick(at, AlertCycleReport::default()).await;

        let snapshot = board.snapshot().await;
        assert_eq!(snapshot.collection_cycles, 1);
        assert_eq!(snapshot.alert_ticks, 2);
        assert_eq!(snapshot.last_collection.unwrap().successful_updates, 80);
    }
}
