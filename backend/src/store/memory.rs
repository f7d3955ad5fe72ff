//! In-memory stores backed by `tokio::sync::RwLock<HashMap>`

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    select_relevant, AlertHistoryEntry, CycleSummary, ForecastKey, PreferencesUpdate,
    StoredForecastRecord, SubscriberPreferences,
};
use tokio::sync::RwLock;

use super::{BulkWriteResult, ForecastStore, MetricsSink, SubscriberStore, WriteOp};
use crate::error::StoreError;

// ============================================================================
// Forecasts
// ============================================================================

#[derive(Debug, Default)]
pub struct InMemoryForecastStore {
    records: RwLock<HashMap<ForecastKey, StoredForecastRecord>>,
}

impl InMemoryForecastStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record, sorted by key
    pub async fn all(&self) -> Vec<StoredForecastRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by_key(|record| record.key());
        records
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ForecastStore for InMemoryForecastStore {
    async fn find(&self, key: &ForecastKey) -> Result<Option<StoredForecastRecord>, StoreError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn bulk_write(&self, ops: Vec<WriteOp>) -> Result<BulkWriteResult, StoreError> {
        let mut records = self.records.write().await;
        let mut result = BulkWriteResult::default();

        for op in ops {
            match op {
                WriteOp::Insert(record) => {
                    let key = record.key();
                    match records.get_mut(&key) {
                        // Raced with another writer, keep the single record
                        Some(existing) => {
                            existing.entry = record.entry;
                            existing.last_updated = record.last_updated;
                            result.updated += 1;
                        }
                        None => {
                            records.insert(key, record);
                            result.inserted += 1;
                        }
                    }
                }
                WriteOp::Update {
                    key,
                    entry,
                    last_updated,
                } => match records.get_mut(&key) {
                    Some(existing) => {
                        existing.entry = entry;
                        existing.last_updated = last_updated;
                        result.updated += 1;
                    }
                    None => {
                        let reason = StoreError::Query(format!("no record for {}", key));
                        result.failed.push((key, reason));
                    }
                },
            }
        }

        Ok(result)
    }

    async fn find_relevant(
        &self,
        location_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<StoredForecastRecord>, StoreError> {
        let records = self.records.read().await;
        let for_location = records.values().filter(|r| r.location_id == location_id);
        Ok(select_relevant(for_location, now).cloned())
    }

    async fn count_for_location(&self, location_id: &str) -> Result<u64, StoreError> {
        let records = self.records.read().await;
        Ok(records.keys().filter(|k| k.location_id == location_id).count() as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ============================================================================
// Subscribers
// ============================================================================

#[derive(Debug, Default)]
pub struct InMemorySubscriberStore {
    subscribers: RwLock<HashMap<String, SubscriberPreferences>>,
}

impl InMemorySubscriberStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a whole document, dispatch bookkeeping included
    pub async fn insert(&self, prefs: SubscriberPreferences) {
        self.subscribers
            .write()
            .await
            .insert(prefs.subscriber_id.clone(), prefs);
    }
}

#[async_trait]
impl SubscriberStore for InMemorySubscriberStore {
    async fn get_or_create(
        &self,
        subscriber_id: &str,
        default_interval_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<SubscriberPreferences, StoreError> {
        let mut subscribers = self.subscribers.write().await;
        let prefs = subscribers
            .entry(subscriber_id.to_string())
            .or_insert_with(|| {
                SubscriberPreferences::with_defaults(subscriber_id, default_interval_secs, now)
            });
        Ok(prefs.clone())
    }

    async fn get(&self, subscriber_id: &str) -> Result<Option<SubscriberPreferences>, StoreError> {
        Ok(self.subscribers.read().await.get(subscriber_id).cloned())
    }

    async fn apply_update(
        &self,
        subscriber_id: &str,
        default_interval_secs: i64,
        update: PreferencesUpdate,
        now: DateTime<Utc>,
    ) -> Result<SubscriberPreferences, StoreError> {
        let mut subscribers = self.subscribers.write().await;
        let prefs = subscribers
            .entry(subscriber_id.to_string())
            .or_insert_with(|| {
                SubscriberPreferences::with_defaults(subscriber_id, default_interval_secs, now)
            });
        update.apply(prefs, now);
        Ok(prefs.clone())
    }

    async fn list(&self) -> Result<Vec<SubscriberPreferences>, StoreError> {
        let mut all: Vec<_> = self.subscribers.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.subscriber_id.cmp(&b.subscriber_id));
        Ok(all)
    }

    async fn record_dispatch(
        &self,
        subscriber_id: &str,
        expected_last_sent: Option<DateTime<Utc>>,
        entry: AlertHistoryEntry,
    ) -> Result<bool, StoreError> {
        let mut subscribers = self.subscribers.write().await;
        match subscribers.get_mut(subscriber_id) {
            Some(prefs) if prefs.last_alert_sent == expected_last_sent => {
                prefs.record_dispatch(entry);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Default)]
pub struct InMemoryMetricsSink {
    summaries: RwLock<Vec<CycleSummary>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn summaries(&self) -> Vec<CycleSummary> {
        self.summaries.read().await.clone()
    }
}

#[async_trait]
impl MetricsSink for InMemoryMetricsSink {
    async fn persist(&self, summary: &CycleSummary) -> Result<(), StoreError> {
        self.summaries.write().await.push(summary.clone());
        Ok(())
    }
}
