//! Durable stores for forecasts, subscriber preferences and cycle summaries
//!
//! The collector and the evaluator only talk to these traits. Postgres backs
//! production; the in-memory implementation backs local runs and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    AlertHistoryEntry, CycleSummary, ForecastEntry, ForecastKey, PreferencesUpdate,
    StoredForecastRecord, SubscriberPreferences,
};

use crate::error::StoreError;

pub mod memory;
pub mod postgres;

pub use memory::{InMemoryForecastStore, InMemoryMetricsSink, InMemorySubscriberStore};
pub use postgres::{PgForecastStore, PgMetricsSink, PgSubscriberStore};

/// One write submitted by the synchronizer
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// First sight of a key
    Insert(StoredForecastRecord),
    /// Replace the nested entry of an existing key and bump `last_updated`
    Update {
        key: ForecastKey,
        entry: ForecastEntry,
        last_updated: DateTime<Utc>,
    },
}

impl WriteOp {
    pub fn key(&self) -> ForecastKey {
        match self {
            WriteOp::Insert(record) => record.key(),
            WriteOp::Update { key, .. } => key.clone(),
        }
    }
}

/// Per-key outcome of a bulk write
#[derive(Debug, Default)]
pub struct BulkWriteResult {
    pub inserted: usize,
    pub updated: usize,
    /// Keys whose write failed, with the reason
    pub failed: Vec<(ForecastKey, StoreError)>,
}

impl BulkWriteResult {
    pub fn applied(&self) -> usize {
        self.inserted + self.updated
    }
}

#[async_trait]
pub trait ForecastStore: Send + Sync {
    /// Point lookup by (location, forecast time)
    async fn find(&self, key: &ForecastKey) -> Result<Option<StoredForecastRecord>, StoreError>;

    /// Submit every write of one location in one round trip.
    ///
    /// Each write is atomic per key. An `Err` means the store became
    /// unreachable and the remaining writes were not attempted.
    async fn bulk_write(&self, ops: Vec<WriteOp>) -> Result<BulkWriteResult, StoreError>;

    /// Earliest record not before `now`, else the latest past record
    async fn find_relevant(
        &self,
        location_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<StoredForecastRecord>, StoreError>;

    async fn count_for_location(&self, location_id: &str) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SubscriberStore: Send + Sync {
    /// Fetch a subscriber, creating it with default preferences on first use
    async fn get_or_create(
        &self,
        subscriber_id: &str,
        default_interval_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<SubscriberPreferences, StoreError>;

    async fn get(&self, subscriber_id: &str) -> Result<Option<SubscriberPreferences>, StoreError>;

    /// Apply a validated preference change to the current stored document,
    /// creating the subscriber with defaults first if needed. The read and the
    /// write happen under one lock, so a dispatch recorded concurrently keeps
    /// its `last_alert_sent` and history entry.
    async fn apply_update(
        &self,
        subscriber_id: &str,
        default_interval_secs: i64,
        update: PreferencesUpdate,
        now: DateTime<Utc>,
    ) -> Result<SubscriberPreferences, StoreError>;

    async fn list(&self) -> Result<Vec<SubscriberPreferences>, StoreError>;

    /// Record a delivered alert batch, but only if `last_alert_sent` still
    /// equals `expected_last_sent`. Returns whether the write was applied.
    async fn record_dispatch(
        &self,
        subscriber_id: &str,
        expected_last_sent: Option<DateTime<Utc>>,
        entry: AlertHistoryEntry,
    ) -> Result<bool, StoreError>;
}

/// Write-only, best-effort sink for cycle summaries
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn persist(&self, summary: &CycleSummary) -> Result<(), StoreError>;
}
