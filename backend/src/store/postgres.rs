//! PostgreSQL stores
//!
//! Forecast entries and subscriber preferences are kept as JSONB documents
//! next to the columns they are keyed and ordered by.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    AlertHistoryEntry, CycleSummary, ForecastEntry, ForecastKey, PreferencesUpdate,
    StoredForecastRecord, SubscriberPreferences,
};
use sqlx::{types::Json, PgPool, Postgres, QueryBuilder};

use super::{BulkWriteResult, ForecastStore, MetricsSink, SubscriberStore, WriteOp};
use crate::error::StoreError;

// ============================================================================
// Forecasts
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct ForecastRow {
    location_id: String,
    location_name: String,
    entry: Json<ForecastEntry>,
    collected_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

impl From<ForecastRow> for StoredForecastRecord {
    fn from(row: ForecastRow) -> Self {
        StoredForecastRecord {
            location_id: row.location_id,
            location_name: row.location_name,
            entry: row.entry.0,
            collected_at: row.collected_at,
            last_updated: row.last_updated,
        }
    }
}

const FORECAST_COLUMNS: &str = "location_id, location_name, entry, collected_at, last_updated";

const UPSERT_CONFLICT_CLAUSE: &str = " ON CONFLICT (location_id, forecast_time) DO UPDATE \
     SET entry = EXCLUDED.entry, last_updated = EXCLUDED.last_updated \
     RETURNING (xmax = 0) AS inserted";

/// Forecast store service
#[derive(Clone)]
pub struct PgForecastStore {
    db: PgPool,
}

impl PgForecastStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// All inserts of a batch as one multi-row upsert
    async fn insert_many(&self, records: &[StoredForecastRecord]) -> Result<(usize, usize), StoreError> {
        if records.is_empty() {
            return Ok((0, 0));
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO forecast_records \
             (location_id, forecast_time, location_name, entry, collected_at, last_updated) ",
        );
        builder.push_values(records, |mut row, record| {
            row.push_bind(&record.location_id)
                .push_bind(record.entry.forecast_time)
                .push_bind(&record.location_name)
                .push_bind(Json(&record.entry))
                .push_bind(record.collected_at)
                .push_bind(record.last_updated);
        });
        builder.push(UPSERT_CONFLICT_CLAUSE);

        let flags: Vec<bool> = builder.build_query_scalar().fetch_all(&self.db).await?;
        let inserted = flags.iter().filter(|inserted| **inserted).count();
        Ok((inserted, flags.len() - inserted))
    }

    /// All in-place updates of a batch as one statement. Returns the keys
    /// that matched an existing row.
    async fn update_many(
        &self,
        updates: &[(ForecastKey, &ForecastEntry, DateTime<Utc>)],
    ) -> Result<Vec<ForecastKey>, StoreError> {
        if updates.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE forecast_records AS f SET entry = v.entry, last_updated = v.last_updated FROM (");
        builder.push_values(updates, |mut row, (key, entry, last_updated)| {
            row.push_bind(&key.location_id)
                .push_bind(key.forecast_time)
                .push_bind(Json(*entry))
                .push_bind(*last_updated);
        });
        builder.push(
            ") AS v(location_id, forecast_time, entry, last_updated) \
             WHERE f.location_id = v.location_id AND f.forecast_time = v.forecast_time \
             RETURNING f.location_id, f.forecast_time",
        );

        let rows: Vec<(String, DateTime<Utc>)> = builder.build_query_as().fetch_all(&self.db).await?;
        Ok(rows
            .into_iter()
            .map(|(location_id, forecast_time)| ForecastKey::new(location_id, forecast_time))
            .collect())
    }

    /// Apply one write on its own, used to isolate failing keys
    async fn write_one(&self, op: &WriteOp, result: &mut BulkWriteResult) -> Result<(), StoreError> {
        let outcome = match op {
            WriteOp::Insert(record) => self
                .insert_many(std::slice::from_ref(record))
                .await
                .map(|(inserted, updated)| {
                    result.inserted += inserted;
                    result.updated += updated;
                }),
            WriteOp::Update {
                key,
                entry,
                last_updated,
            } => sqlx::query(
                "UPDATE forecast_records SET entry = $3, last_updated = $4 \
                 WHERE location_id = $1 AND forecast_time = $2",
            )
            .bind(&key.location_id)
            .bind(key.forecast_time)
            .bind(Json(entry))
            .bind(*last_updated)
            .execute(&self.db)
            .await
            .map_err(StoreError::from)
            .and_then(|done| {
                if done.rows_affected() == 0 {
                    Err(StoreError::Query(format!("no record for {}", key)))
                } else {
                    result.updated += 1;
                    Ok(())
                }
            }),
        };

        match outcome {
            Err(err) if err.is_connectivity() => Err(err),
            Err(err) => {
                tracing::warn!("Write for {} failed: {}", op.key(), err);
                result.failed.push((op.key(), err));
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }
}

#[async_trait]
impl ForecastStore for PgForecastStore {
    async fn find(&self, key: &ForecastKey) -> Result<Option<StoredForecastRecord>, StoreError> {
        let row = sqlx::query_as::<_, ForecastRow>(&format!(
            "SELECT {} FROM forecast_records WHERE location_id = $1 AND forecast_time = $2",
            FORECAST_COLUMNS
        ))
        .bind(&key.location_id)
        .bind(key.forecast_time)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(StoredForecastRecord::from))
    }

    async fn bulk_write(&self, ops: Vec<WriteOp>) -> Result<BulkWriteResult, StoreError> {
        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        for op in &ops {
            match op {
                WriteOp::Insert(record) => inserts.push(record.clone()),
                WriteOp::Update {
                    key,
                    entry,
                    last_updated,
                } => updates.push((key.clone(), entry, *last_updated)),
            }
        }

        let bulk = async {
            let (inserted, upserted) = self.insert_many(&inserts).await?;
            let matched = self.update_many(&updates).await?;
            Ok::<_, StoreError>((inserted, upserted, matched))
        };

        match bulk.await {
            Ok((inserted, upserted, matched)) => {
                let mut result = BulkWriteResult {
                    inserted,
                    updated: upserted + matched.len(),
                    failed: Vec::new(),
                };
                for (key, _, _) in &updates {
                    if !matched.contains(key) {
                        let reason = StoreError::Query(format!("no record for {}", key));
                        result.failed.push((key.clone(), reason));
                    }
                }
                Ok(result)
            }
            Err(err) if err.is_connectivity() => Err(err),
            Err(err) => {
                // Part of the batch may already be applied. Upserts are
                // idempotent, so replaying row by row is safe.
                tracing::warn!("Bulk write failed, retrying row by row: {}", err);
                let mut result = BulkWriteResult::default();
                for op in &ops {
                    self.write_one(op, &mut result).await?;
                }
                Ok(result)
            }
        }
    }

    async fn find_relevant(
        &self,
        location_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<StoredForecastRecord>, StoreError> {
        let upcoming = sqlx::query_as::<_, ForecastRow>(&format!(
            "SELECT {} FROM forecast_records WHERE location_id = $1 AND forecast_time >= $2 \
             ORDER BY forecast_time ASC LIMIT 1",
            FORECAST_COLUMNS
        ))
        .bind(location_id)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;

        if let Some(row) = upcoming {
            return Ok(Some(row.into()));
        }

        let latest_past = sqlx::query_as::<_, ForecastRow>(&format!(
            "SELECT {} FROM forecast_records WHERE location_id = $1 AND forecast_time < $2 \
             ORDER BY forecast_time DESC LIMIT 1",
            FORECAST_COLUMNS
        ))
        .bind(location_id)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;

        Ok(latest_past.map(StoredForecastRecord::from))
    }

    async fn count_for_location(&self, location_id: &str) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM forecast_records WHERE location_id = $1")
                .bind(location_id)
                .fetch_one(&self.db)
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }
}

// ============================================================================
// Subscribers
// ============================================================================

/// Subscriber preference store service
#[derive(Clone)]
pub struct PgSubscriberStore {
    db: PgPool,
}

impl PgSubscriberStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SubscriberStore for PgSubscriberStore {
    async fn get_or_create(
        &self,
        subscriber_id: &str,
        default_interval_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<SubscriberPreferences, StoreError> {
        let defaults = SubscriberPreferences::with_defaults(subscriber_id, default_interval_secs, now);

        sqlx::query(
            "INSERT INTO subscriber_preferences (subscriber_id, preferences, last_alert_sent, updated_at) \
             VALUES ($1, $2, NULL, $3) ON CONFLICT (subscriber_id) DO NOTHING",
        )
        .bind(subscriber_id)
        .bind(Json(&defaults))
        .bind(now)
        .execute(&self.db)
        .await?;

        self.get(subscriber_id)
            .await?
            .ok_or_else(|| StoreError::Query(format!("subscriber {} vanished after insert", subscriber_id)))
    }

    async fn get(&self, subscriber_id: &str) -> Result<Option<SubscriberPreferences>, StoreError> {
        let row: Option<Json<SubscriberPreferences>> = sqlx::query_scalar(
            "SELECT preferences FROM subscriber_preferences WHERE subscriber_id = $1",
        )
        .bind(subscriber_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|json| json.0))
    }

    async fn apply_update(
        &self,
        subscriber_id: &str,
        default_interval_secs: i64,
        update: PreferencesUpdate,
        now: DateTime<Utc>,
    ) -> Result<SubscriberPreferences, StoreError> {
        let defaults = SubscriberPreferences::with_defaults(subscriber_id, default_interval_secs, now);
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "INSERT INTO subscriber_preferences (subscriber_id, preferences, last_alert_sent, updated_at) \
             VALUES ($1, $2, NULL, $3) ON CONFLICT (subscriber_id) DO NOTHING",
        )
        .bind(subscriber_id)
        .bind(Json(&defaults))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let Json(mut prefs): Json<SubscriberPreferences> = sqlx::query_scalar(
            "SELECT preferences FROM subscriber_preferences WHERE subscriber_id = $1 FOR UPDATE",
        )
        .bind(subscriber_id)
        .fetch_one(&mut *tx)
        .await?;

        update.apply(&mut prefs, now);

        sqlx::query(
            "UPDATE subscriber_preferences SET preferences = $2, updated_at = $3 WHERE subscriber_id = $1",
        )
        .bind(subscriber_id)
        .bind(Json(&prefs))
        .bind(prefs.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(prefs)
    }

    async fn list(&self) -> Result<Vec<SubscriberPreferences>, StoreError> {
        let rows: Vec<Json<SubscriberPreferences>> = sqlx::query_scalar(
            "SELECT preferences FROM subscriber_preferences ORDER BY subscriber_id",
        )
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(|json| json.0).collect())
    }

    async fn record_dispatch(
        &self,
        subscriber_id: &str,
        expected_last_sent: Option<DateTime<Utc>>,
        entry: AlertHistoryEntry,
    ) -> Result<bool, StoreError> {
        let mut tx = self.db.begin().await?;

        let current: Option<Json<SubscriberPreferences>> = sqlx::query_scalar(
            "SELECT preferences FROM subscriber_preferences WHERE subscriber_id = $1 FOR UPDATE",
        )
        .bind(subscriber_id)
        .fetch_optional(&mut *tx)
        .await?;

        let mut prefs = match current {
            Some(Json(prefs)) if prefs.last_alert_sent == expected_last_sent => prefs,
            _ => return Ok(false),
        };
        prefs.record_dispatch(entry);

        sqlx::query(
            "UPDATE subscriber_preferences SET preferences = $2, last_alert_sent = $3, updated_at = $4 \
             WHERE subscriber_id = $1",
        )
        .bind(subscriber_id)
        .bind(Json(&prefs))
        .bind(prefs.last_alert_sent)
        .bind(prefs.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Clone)]
pub struct PgMetricsSink {
    db: PgPool,
}

impl PgMetricsSink {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MetricsSink for PgMetricsSink {
    async fn persist(&self, summary: &CycleSummary) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO collection_cycles (id, service, recorded_at, status, summary) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(summary.id)
        .bind(&summary.service)
        .bind(summary.timestamp)
        .bind(summary.status.as_str())
        .bind(Json(summary))
        .execute(&self.db)
        .await?;

        Ok(())
    }
}
