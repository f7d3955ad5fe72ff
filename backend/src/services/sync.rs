//! Differential forecast synchronization
//!
//! Merges a freshly fetched batch into the forecast store. Unseen
//! (location, forecast time) keys are inserted, known keys are rewritten only
//! when temperature, humidity or the condition code changed, and everything
//! else is left untouched. Running the same batch twice writes nothing the
//! second time. When a batch repeats a key, its last occurrence is the one
//! compared with the store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{ForecastBatch, ForecastEntry, ForecastKey, StoredForecastRecord};
use tokio::time::Instant;

use crate::error::StoreError;
use crate::store::{ForecastStore, WriteOp};

/// Outcome of synchronizing one batch
#[derive(Debug, Default, Clone, Serialize)]
pub struct SyncReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Earlier occurrences of a key repeated later in the same batch
    pub superseded: usize,
    /// Entries whose lookup or write failed
    pub failed: usize,
    /// Duration of every store round trip made
    #[serde(skip)]
    pub db_durations: Vec<Duration>,
}

impl SyncReport {
    /// Entries inserted or updated
    pub fn applied(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Sync service for forecast batches
#[derive(Clone)]
pub struct ForecastSynchronizer {
    store: Arc<dyn ForecastStore>,
}

impl ForecastSynchronizer {
    pub fn new(store: Arc<dyn ForecastStore>) -> Self {
        Self { store }
    }

    /// Synchronize one batch.
    ///
    /// A failure on a single entry is logged and skipped. Losing the store
    /// aborts the batch with `Err`; whatever was already written stays and
    /// the next cycle reconciles the rest.
    pub async fn synchronize(
        &self,
        batch: &ForecastBatch,
        now: DateTime<Utc>,
    ) -> Result<SyncReport, StoreError> {
        let mut report = SyncReport::default();
        let mut pending: BTreeMap<ForecastKey, WriteOp> = BTreeMap::new();

        let mut latest: BTreeMap<ForecastKey, &ForecastEntry> = BTreeMap::new();
        for entry in &batch.entries {
            let key = ForecastKey::new(batch.location.id.clone(), entry.forecast_time);
            if latest.insert(key, entry).is_some() {
                report.superseded += 1;
            }
        }

        for (key, entry) in latest {
            let started = Instant::now();
            let lookup = self.store.find(&key).await;
            report.db_durations.push(started.elapsed());

            match lookup {
                Ok(None) => {
                    let record =
                        StoredForecastRecord::first_seen(&batch.location, entry.clone(), now);
                    pending.insert(key, WriteOp::Insert(record));
                }
                Ok(Some(existing)) => {
                    if existing.entry.differs_significantly(entry) {
                        tracing::debug!(
                            "Forecast {} changed: {} -> {}°C",
                            key,
                            existing.entry.temperature_celsius,
                            entry.temperature_celsius
                        );
                        pending.insert(
                            key.clone(),
                            WriteOp::Update {
                                key,
                                entry: entry.clone(),
                                last_updated: now,
                            },
                        );
                    } else {
                        report.unchanged += 1;
                    }
                }
                Err(e) if e.is_connectivity() => {
                    tracing::error!(
                        "Forecast store unreachable while syncing {}: {}",
                        batch.location.name,
                        e
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!("Lookup for {} failed, skipping entry: {}", key, e);
                    report.failed += 1;
                }
            }
        }

        if pending.is_empty() {
            tracing::debug!(
                "No changes for {} ({} entries unchanged)",
                batch.location.name,
                report.unchanged
            );
            return Ok(report);
        }

        let ops: Vec<WriteOp> = pending.into_values().collect();
        let submitted = ops.len();

        let started = Instant::now();
        let written = self.store.bulk_write(ops).await;
        report.db_durations.push(started.elapsed());

        match written {
            Ok(result) => {
                for (key, reason) in &result.failed {
                    tracing::warn!("Write for {} failed: {}", key, reason);
                }
                report.inserted += result.inserted;
                report.updated += result.updated;
                report.failed += result.failed.len();
            }
            Err(e) if e.is_connectivity() => {
                tracing::error!(
                    "Forecast store unreachable while writing {}: {}",
                    batch.location.name,
                    e
                );
                return Err(e);
            }
            Err(e) => {
                tracing::warn!("Bulk write for {} failed: {}", batch.location.name, e);
                report.failed += submitted;
            }
        }

        tracing::info!(
            "Synchronized {}: {} inserted, {} updated, {} unchanged, {} failed",
            batch.location.name,
            report.inserted,
            report.updated,
            report.unchanged,
            report.failed
        );

        Ok(report)
    }
}
