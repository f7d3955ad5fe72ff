//! Forecast data models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::GpsCoordinates;

/// A monitored location. Owned by configuration and read-only to the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Location {
    pub id: String,
    pub name: String,
    pub latitude: Decimal,
    pub longitude: Decimal,
}

impl Location {
    pub fn new(id: impl Into<String>, name: impl Into<String>, coordinates: GpsCoordinates) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            latitude: coordinates.latitude,
            longitude: coordinates.longitude,
        }
    }

    pub fn coordinates(&self) -> GpsCoordinates {
        GpsCoordinates::new(self.latitude, self.longitude)
    }
}

/// One timestamped weather prediction for a location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastEntry {
    /// The point in time this entry predicts (not when it was fetched)
    pub forecast_time: DateTime<Utc>,
    pub temperature_celsius: Decimal,
    pub feels_like_celsius: Decimal,
    pub humidity_percent: i32,
    pub pressure_hpa: i32,
    pub wind_speed_mps: Decimal,
    pub wind_direction_deg: i32,
    pub cloud_coverage_percent: i32,
    /// Precipitation volume for the slot, rain and snow combined
    pub precipitation_mm: Decimal,
    /// Provider weather-condition id (e.g. 500 for light rain)
    pub condition_code: i32,
    pub condition: String,
    pub description: String,
}

impl ForecastEntry {
    /// Compare the fields that make a forecast change worth writing.
    ///
    /// Only temperature, humidity and the condition code count. Other fields
    /// drift between calls without changing the forecast meaningfully.
    pub fn differs_significantly(&self, other: &ForecastEntry) -> bool {
        self.temperature_celsius != other.temperature_celsius
            || self.humidity_percent != other.humidity_percent
            || self.condition_code != other.condition_code
    }
}

/// Storage key of a forecast entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForecastKey {
    pub location_id: String,
    pub forecast_time: DateTime<Utc>,
}

impl ForecastKey {
    pub fn new(location_id: impl Into<String>, forecast_time: DateTime<Utc>) -> Self {
        Self {
            location_id: location_id.into(),
            forecast_time,
        }
    }
}

impl std::fmt::Display for ForecastKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.location_id, self.forecast_time.timestamp())
    }
}

/// Result of one fetch: a location, its ordered entries and the collection time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastBatch {
    pub location: Location,
    pub entries: Vec<ForecastEntry>,
    pub collected_at: DateTime<Utc>,
}

/// Persisted forecast entry for one (location, forecast time) key.
///
/// Records are never deleted. Entries whose forecast time has passed are
/// historical by virtue of being in the past.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredForecastRecord {
    pub location_id: String,
    pub location_name: String,
    pub entry: ForecastEntry,
    pub collected_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl StoredForecastRecord {
    /// Create a record on first sight of a key
    pub fn first_seen(location: &Location, entry: ForecastEntry, now: DateTime<Utc>) -> Self {
        Self {
            location_id: location.id.clone(),
            location_name: location.name.clone(),
            entry,
            collected_at: now,
            last_updated: now,
        }
    }

    pub fn key(&self) -> ForecastKey {
        ForecastKey::new(self.location_id.clone(), self.entry.forecast_time)
    }

    pub fn forecast_time(&self) -> DateTime<Utc> {
        self.entry.forecast_time
    }

    pub fn is_historical(&self, now: DateTime<Utc>) -> bool {
        self.entry.forecast_time < now
    }
}

/// Pick the forecast that best describes conditions at `now`.
///
/// Returns the earliest record whose forecast time is not before `now`. When
/// every record is in the past, returns the latest past record.
pub fn select_relevant<'a, I>(records: I, now: DateTime<Utc>) -> Option<&'a StoredForecastRecord>
where
    I: IntoIterator<Item = &'a StoredForecastRecord>,
{
    let mut upcoming: Option<&StoredForecastRecord> = None;
    let mut latest_past: Option<&StoredForecastRecord> = None;

    for record in records {
        let at = record.forecast_time();
        if at >= now {
            if upcoming.map_or(true, |best| at < best.forecast_time()) {
                upcoming = Some(record);
            }
        } else if latest_past.map_or(true, |best| at > best.forecast_time()) {
            latest_past = Some(record);
        }
    }

    upcoming.or(latest_past)
}
