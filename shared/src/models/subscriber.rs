//! Subscriber preference and alert models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::weather::ForecastEntry;

/// Number of dispatched alert batches kept per subscriber
pub const ALERT_HISTORY_LIMIT: usize = 10;

/// Shortest notification cadence a subscriber may choose (1 minute)
pub const MIN_ALERT_INTERVAL_SECS: i64 = 60;

/// Longest notification cadence a subscriber may choose (24 hours)
pub const MAX_ALERT_INTERVAL_SECS: i64 = 86_400;

/// One category of threshold condition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HighTemperature,
    LowTemperature,
    HighWind,
    HighHumidity,
    HeavyRain,
}

impl AlertKind {
    pub const ALL: [AlertKind; 5] = [
        AlertKind::HighTemperature,
        AlertKind::LowTemperature,
        AlertKind::HighWind,
        AlertKind::HighHumidity,
        AlertKind::HeavyRain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::HighTemperature => "high_temperature",
            AlertKind::LowTemperature => "low_temperature",
            AlertKind::HighWind => "high_wind",
            AlertKind::HighHumidity => "high_humidity",
            AlertKind::HeavyRain => "heavy_rain",
        }
    }

    /// Human readable label used in rendered messages
    pub fn label(&self) -> &'static str {
        match self {
            AlertKind::HighTemperature => "High temperature",
            AlertKind::LowTemperature => "Low temperature",
            AlertKind::HighWind => "Strong wind",
            AlertKind::HighHumidity => "Extreme humidity",
            AlertKind::HeavyRain => "Heavy rain",
        }
    }

    /// The metric of a forecast entry this kind is compared on
    pub fn observe(&self, entry: &ForecastEntry) -> Decimal {
        match self {
            AlertKind::HighTemperature | AlertKind::LowTemperature => entry.temperature_celsius,
            AlertKind::HighWind => entry.wind_speed_mps,
            AlertKind::HighHumidity => Decimal::from(entry.humidity_percent),
            AlertKind::HeavyRain => entry.precipitation_mm,
        }
    }

    /// Low temperature fires below its threshold, every other kind above it.
    pub fn is_violation(&self, observed: Decimal, threshold: Decimal) -> bool {
        match self {
            AlertKind::LowTemperature => observed < threshold,
            _ => observed > threshold,
        }
    }

    pub fn format_value(&self, value: Decimal) -> String {
        match self {
            AlertKind::HighTemperature | AlertKind::LowTemperature => format!("{:.1}°C", value),
            AlertKind::HighWind => format!("{} m/s", value.normalize()),
            AlertKind::HighHumidity => format!("{}%", value.normalize()),
            AlertKind::HeavyRain => format!("{} mm", value.normalize()),
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlertKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Unknown alert kind: {}", s))
    }
}

/// System-wide default thresholds, used when a subscriber has no override
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertThresholds {
    pub high_temperature: Decimal,
    pub low_temperature: Decimal,
    pub high_wind: Decimal,
    pub high_humidity: Decimal,
    pub heavy_rain: Decimal,
}

impl AlertThresholds {
    pub fn get(&self, kind: AlertKind) -> Decimal {
        match kind {
            AlertKind::HighTemperature => self.high_temperature,
            AlertKind::LowTemperature => self.low_temperature,
            AlertKind::HighWind => self.high_wind,
            AlertKind::HighHumidity => self.high_humidity,
            AlertKind::HeavyRain => self.heavy_rain,
        }
    }
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            high_temperature: Decimal::from(30),
            low_temperature: Decimal::from(5),
            high_wind: Decimal::from(10),
            high_humidity: Decimal::from(90),
            heavy_rain: Decimal::from(10),
        }
    }
}

/// A single threshold violation found by the evaluator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertEvent {
    pub location_name: String,
    pub kind: AlertKind,
    pub observed: Decimal,
    pub threshold: Decimal,
    pub forecast_time: DateTime<Utc>,
}

impl AlertEvent {
    pub fn observed_display(&self) -> String {
        self.kind.format_value(self.observed)
    }

    pub fn threshold_display(&self) -> String {
        self.kind.format_value(self.threshold)
    }
}

/// A delivered batch of alerts, kept in the subscriber's bounded history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertHistoryEntry {
    pub id: Uuid,
    pub sent_at: DateTime<Utc>,
    pub events: Vec<AlertEvent>,
}

impl AlertHistoryEntry {
    pub fn new(sent_at: DateTime<Utc>, events: Vec<AlertEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sent_at,
            events,
        }
    }
}

/// Per-subscriber preferences
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriberPreferences {
    /// Opaque subscriber id, also the notification destination
    pub subscriber_id: String,
    /// Monitored location names, in the order they were added
    pub locations: Vec<String>,
    pub alerts: BTreeMap<AlertKind, bool>,
    /// Per-subscriber threshold overrides
    #[serde(default)]
    pub thresholds: BTreeMap<AlertKind, Decimal>,
    pub alert_interval_secs: i64,
    pub last_alert_sent: Option<DateTime<Utc>>,
    #[serde(default)]
    pub alert_history: Vec<AlertHistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriberPreferences {
    /// Preferences for a subscriber seen for the first time
    pub fn with_defaults(
        subscriber_id: impl Into<String>,
        alert_interval_secs: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            locations: Vec::new(),
            alerts: AlertKind::ALL.into_iter().map(|kind| (kind, true)).collect(),
            thresholds: BTreeMap::new(),
            alert_interval_secs: alert_interval_secs
                .clamp(MIN_ALERT_INTERVAL_SECS, MAX_ALERT_INTERVAL_SECS),
            last_alert_sent: None,
            alert_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Kinds missing from the map count as enabled
    pub fn is_enabled(&self, kind: AlertKind) -> bool {
        self.alerts.get(&kind).copied().unwrap_or(true)
    }

    pub fn enabled_kinds(&self) -> impl Iterator<Item = AlertKind> + '_ {
        AlertKind::ALL.into_iter().filter(|kind| self.is_enabled(*kind))
    }

    /// Subscriber override first, then the system default
    pub fn threshold_for(&self, kind: AlertKind, defaults: &AlertThresholds) -> Decimal {
        self.thresholds
            .get(&kind)
            .copied()
            .unwrap_or_else(|| defaults.get(kind))
    }

    /// Cadence gate. A subscriber never notified before is always due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_alert_sent {
            None => true,
            Some(last) => (now - last).num_seconds() >= self.alert_interval_secs,
        }
    }

    pub fn monitors(&self, location_name: &str) -> bool {
        self.locations.iter().any(|name| name == location_name)
    }

    /// Returns false when the location was already monitored
    pub fn add_location(&mut self, location_name: &str) -> bool {
        if self.monitors(location_name) {
            return false;
        }
        self.locations.push(location_name.to_string());
        true
    }

    /// Returns false when the location was not monitored
    pub fn remove_location(&mut self, location_name: &str) -> bool {
        let before = self.locations.len();
        self.locations.retain(|name| name != location_name);
        self.locations.len() != before
    }

    /// Flip an alert kind and return its new state
    pub fn toggle_alert(&mut self, kind: AlertKind) -> bool {
        let enabled = !self.is_enabled(kind);
        self.alerts.insert(kind, enabled);
        enabled
    }

    pub fn set_threshold(&mut self, kind: AlertKind, value: Decimal) {
        self.thresholds.insert(kind, value);
    }

    pub fn clear_threshold(&mut self, kind: AlertKind) {
        self.thresholds.remove(&kind);
    }

    /// Change the notification cadence, rejecting values outside 1 minute..24 hours
    pub fn set_alert_interval(&mut self, secs: i64) -> Result<(), &'static str> {
        if !(MIN_ALERT_INTERVAL_SECS..=MAX_ALERT_INTERVAL_SECS).contains(&secs) {
            return Err("Alert interval must be between 60 seconds and 24 hours");
        }
        self.alert_interval_secs = secs;
        Ok(())
    }

    /// Record a successful dispatch: bump the cadence timestamp and append to
    /// the bounded history, dropping the oldest entries.
    pub fn record_dispatch(&mut self, entry: AlertHistoryEntry) {
        self.last_alert_sent = Some(entry.sent_at);
        self.updated_at = entry.sent_at;
        self.alert_history.push(entry);
        if self.alert_history.len() > ALERT_HISTORY_LIMIT {
            let excess = self.alert_history.len() - ALERT_HISTORY_LIMIT;
            self.alert_history.drain(..excess);
        }
    }
}

/// A change to subscriber preferences coming from an outer surface
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct PreferencesUpdate {
    #[validate(length(min = 1, max = 100))]
    pub add_location: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub remove_location: Option<String>,
    pub toggle_alert: Option<AlertKind>,
    pub set_threshold: Option<(AlertKind, Decimal)>,
    pub clear_threshold: Option<AlertKind>,
    #[validate(range(min = 60, max = 86400))]
    pub alert_interval_secs: Option<i64>,
}

impl PreferencesUpdate {
    /// Apply a validated update
    pub fn apply(self, prefs: &mut SubscriberPreferences, now: DateTime<Utc>) {
        if let Some(name) = self.add_location {
            prefs.add_location(&name);
        }
        if let Some(name) = self.remove_location {
            prefs.remove_location(&name);
        }
        if let Some(kind) = self.toggle_alert {
            prefs.toggle_alert(kind);
        }
        if let Some((kind, value)) = self.set_threshold {
            prefs.set_threshold(kind, value);
        }
        if let Some(kind) = self.clear_threshold {
            prefs.clear_threshold(kind);
        }
        if let Some(secs) = self.alert_interval_secs {
            // Range is enforced by `validate` before apply
            let _ = prefs.set_alert_interval(secs);
        }
        prefs.updated_at = now;
    }
}
