//! Threshold alert evaluation
//!
//! On every tick each subscriber whose cadence has elapsed is checked against
//! the most relevant stored forecast of every location they monitor. Any
//! violations are rendered into one message and dispatched. Only a confirmed
//! delivery moves the subscriber's cadence forward.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{
    AlertEvent, AlertHistoryEntry, AlertThresholds, Location, StoredForecastRecord,
    SubscriberPreferences,
};
use tokio::task::JoinSet;

use crate::error::StoreError;
use crate::services::notification::RetryingDispatcher;
use crate::store::{ForecastStore, SubscriberStore};

/// Where one subscriber ended up on one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationOutcome {
    /// Cadence not elapsed
    Gated,
    NoViolation,
    Dispatched { events: usize },
    /// Delivery failed after retries; nothing was recorded
    DispatchFailed,
    /// Delivered, but another tick recorded a dispatch first
    Superseded,
}

/// Counters for one alert tick
#[derive(Debug, Default, Clone, Serialize)]
pub struct AlertCycleReport {
    pub subscribers: usize,
    pub gated: usize,
    pub no_violation: usize,
    pub dispatched: usize,
    pub dispatch_failed: usize,
    pub superseded: usize,
    pub errors: usize,
}

impl AlertCycleReport {
    fn record(&mut self, outcome: EvaluationOutcome) {
        match outcome {
            EvaluationOutcome::Gated => self.gated += 1,
            EvaluationOutcome::NoViolation => self.no_violation += 1,
            EvaluationOutcome::Dispatched { .. } => self.dispatched += 1,
            EvaluationOutcome::DispatchFailed => self.dispatch_failed += 1,
            EvaluationOutcome::Superseded => self.superseded += 1,
        }
    }
}

// ============================================================================
// Pure evaluation
// ============================================================================

/// Compare one forecast record with a subscriber's enabled alert kinds
pub fn evaluate_record(
    prefs: &SubscriberPreferences,
    record: &StoredForecastRecord,
    defaults: &AlertThresholds,
) -> Vec<AlertEvent> {
    prefs
        .enabled_kinds()
        .filter_map(|kind| {
            let observed = kind.observe(&record.entry);
            let threshold = prefs.threshold_for(kind, defaults);
            kind.is_violation(observed, threshold).then(|| AlertEvent {
                location_name: record.location_name.clone(),
                kind,
                observed,
                threshold,
                forecast_time: record.forecast_time(),
            })
        })
        .collect()
}

/// Escape the characters Telegram's legacy Markdown treats as markup
fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Render alert events as one Markdown message, grouped per location in the
/// order the events were produced.
pub fn render_alert_message(events: &[AlertEvent]) -> String {
    let mut message = String::from("⚠️ *WEATHER ALERTS* ⚠️\n");
    let mut current: Option<&str> = None;

    for event in events {
        if current != Some(event.location_name.as_str()) {
            message.push_str(&format!(
                "\n*{}* _(forecast for {})_\n",
                escape_markdown(&event.location_name),
                event.forecast_time.format("%Y-%m-%d %H:%M UTC")
            ));
            current = Some(event.location_name.as_str());
        }
        message.push_str(&format!(
            "• {}: {} (threshold {})\n",
            event.kind.label(),
            event.observed_display(),
            event.threshold_display()
        ));
    }

    message
}

// ============================================================================
// Evaluator service
// ============================================================================

/// Alert evaluation service
pub struct AlertEvaluator {
    forecasts: Arc<dyn ForecastStore>,
    subscribers: Arc<dyn SubscriberStore>,
    dispatcher: RetryingDispatcher,
    locations_by_name: HashMap<String, Location>,
    defaults: AlertThresholds,
}

impl AlertEvaluator {
    pub fn new(
        forecasts: Arc<dyn ForecastStore>,
        subscribers: Arc<dyn SubscriberStore>,
        dispatcher: RetryingDispatcher,
        locations: Vec<Location>,
        defaults: AlertThresholds,
    ) -> Self {
        let locations_by_name = locations
            .into_iter()
            .map(|location| (location.name.clone(), location))
            .collect();

        Self {
            forecasts,
            subscribers,
            dispatcher,
            locations_by_name,
            defaults,
        }
    }

    /// Violations across every location a subscriber monitors.
    ///
    /// Unknown locations and locations without stored data are skipped.
    pub async fn collect_events(
        &self,
        prefs: &SubscriberPreferences,
        now: DateTime<Utc>,
    ) -> Result<Vec<AlertEvent>, StoreError> {
        let mut events = Vec::new();

        for name in &prefs.locations {
            let Some(location) = self.locations_by_name.get(name) else {
                tracing::debug!("Subscriber {} monitors unknown location {}", prefs.subscriber_id, name);
                continue;
            };

            let record = match self.forecasts.find_relevant(&location.id, now).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    tracing::debug!("No forecast stored for {}, skipping", location.name);
                    continue;
                }
                Err(e) if e.is_connectivity() => return Err(e),
                Err(e) => {
                    tracing::warn!("Forecast lookup for {} failed, skipping: {}", location.name, e);
                    continue;
                }
            };

            if record.is_historical(now) {
                tracing::debug!(
                    "No upcoming forecast for {}, using the one for {}",
                    location.name,
                    record.forecast_time()
                );
            }

            events.extend(evaluate_record(prefs, &record, &self.defaults));
        }

        Ok(events)
    }

    /// Run one subscriber through the gate, evaluation and dispatch
    pub async fn evaluate_subscriber(
        &self,
        prefs: &SubscriberPreferences,
        now: DateTime<Utc>,
    ) -> Result<EvaluationOutcome, StoreError> {
        if !prefs.is_due(now) {
            return Ok(EvaluationOutcome::Gated);
        }

        let events = self.collect_events(prefs, now).await?;
        if events.is_empty() {
            return Ok(EvaluationOutcome::NoViolation);
        }

        let message = render_alert_message(&events);
        if let Err(e) = self.dispatcher.dispatch(&prefs.subscriber_id, &message).await {
            tracing::error!("Alert delivery to {} failed: {}", prefs.subscriber_id, e);
            return Ok(EvaluationOutcome::DispatchFailed);
        }

        let count = events.len();
        let entry = AlertHistoryEntry::new(now, events);
        let applied = self
            .subscribers
            .record_dispatch(&prefs.subscriber_id, prefs.last_alert_sent, entry)
            .await?;

        if applied {
            tracing::info!("Alert sent to {}: {} conditions", prefs.subscriber_id, count);
            Ok(EvaluationOutcome::Dispatched { events: count })
        } else {
            tracing::warn!(
                "Dispatch for {} was already recorded by another tick",
                prefs.subscriber_id
            );
            Ok(EvaluationOutcome::Superseded)
        }
    }

    /// Evaluate every subscriber concurrently
    pub async fn run_cycle(self: &Arc<Self>, now: DateTime<Utc>) -> AlertCycleReport {
        let mut report = AlertCycleReport::default();

        let subscribers = match self.subscribers.list().await {
            Ok(subscribers) => subscribers,
            Err(e) => {
                tracing::error!("Could not list subscribers: {}", e);
                report.errors += 1;
                return report;
            }
        };
        report.subscribers = subscribers.len();

        let mut tasks = JoinSet::new();
        for prefs in subscribers {
            let evaluator = Arc::clone(self);
            tasks.spawn(async move {
                let outcome = evaluator.evaluate_subscriber(&prefs, now).await;
                (prefs.subscriber_id, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => report.record(outcome),
                Ok((subscriber_id, Err(e))) => {
                    tracing::error!("Evaluation of {} failed: {}", subscriber_id, e);
                    report.errors += 1;
                }
                Err(e) => {
                    tracing::error!("Evaluation task panicked: {}", e);
                    report.errors += 1;
                }
            }
        }

        tracing::debug!(
            "Alert tick: {} subscribers, {} gated, {} dispatched, {} failed",
            report.subscribers,
            report.gated,
            report.dispatched,
            report.dispatch_failed
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use shared::{AlertKind, ForecastEntry, GpsCoordinates};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn record(name: &str, temp: &str, humidity: i32, wind: &str, rain: &str) -> StoredForecastRecord {
        let location = Location::new(name.to_lowercase(), name, GpsCoordinates::new(dec("28.1"), dec("-15.4")));
        let entry = ForecastEntry {
            forecast_time: now(),
            temperature_celsius: dec(temp),
            feels_like_celsius: dec(temp),
            humidity_percent: humidity,
            pressure_hpa: 1013,
            wind_speed_mps: dec(wind),
            wind_direction_deg: 90,
            cloud_coverage_percent: 0,
            precipitation_mm: dec(rain),
            condition_code: 800,
            condition: "Clear".to_string(),
            description: "clear sky".to_string(),
        };
        StoredForecastRecord::first_seen(&location, entry, now())
    }

    #[test]
    fn test_high_temperature_threshold() {
        let prefs = SubscriberPreferences::with_defaults("42", 3600, now());
        let defaults = AlertThresholds::default();

        let events = evaluate_record(&prefs, &record("Testville", "31.0", 50, "1", "0"), &defaults);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertKind::HighTemperature);
        assert_eq!(events[0].observed_display(), "31.0°C");

        let events = evaluate_record(&prefs, &record("Testville", "29.0", 50, "1", "0"), &defaults);
        assert!(events.is_empty());
    }

    #[test]
    fn test_every_kind_can_fire() {
        let prefs = SubscriberPreferences::with_defaults("42", 3600, now());
        let defaults = AlertThresholds::default();

        let cold_storm = record("Testville", "2.0", 95, "14.5", "12");
        let kinds: Vec<_> = evaluate_record(&prefs, &cold_storm, &defaults)
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![AlertKind::LowTemperature, AlertKind::HighWind, AlertKind::HighHumidity, AlertKind::HeavyRain]
        );
    }

    #[test]
    fn test_disabled_kind_is_ignored() {
        let mut prefs = SubscriberPreferences::with_defaults("42", 3600, now());
        prefs.toggle_alert(AlertKind::HighTemperature);

        let events = evaluate_record(&prefs, &record("Testville", "40.0", 50, "1", "0"), &AlertThresholds::default());
        assert!(events.is_empty());
    }

    #[test]
    fn test_subscriber_override_wins() {
        let mut prefs = SubscriberPreferences::with_defaults("42", 3600, now());
        prefs.set_threshold(AlertKind::HighTemperature, dec("35"));

        let events = evaluate_record(&prefs, &record("Testville", "33.0", 50, "1", "0"), &AlertThresholds::default());
        assert!(events.is_empty());

        let events = evaluate_record(&prefs, &record("Testville", "36.0", 50, "1", "0"), &AlertThresholds::default());
        assert_eq!(events[0].threshold, dec("35"));
    }

    #[test]
    fn test_message_groups_by_location() {
        let prefs = SubscriberPreferences::with_defaults("42", 3600, now());
        let defaults = AlertThresholds::default();

        let mut events = evaluate_record(&prefs, &record("Las Palmas", "36.0", 95, "1", "0"), &defaults);
        events.extend(evaluate_record(&prefs, &record("Santa_Cruz", "1.0", 50, "1", "0"), &defaults));

        let message = render_alert_message(&events);
        assert!(message.starts_with("⚠️ *WEATHER ALERTS* ⚠️\n"));
        assert_eq!(message.matches("*Las Palmas*").count(), 1);
        assert!(message.contains("*Santa\\_Cruz*"));
        assert!(message.contains("• High temperature: 36.0°C (threshold 30.0°C)"));
        assert!(message.contains("• Extreme humidity: 95% (threshold 90%)"));
        assert!(message.contains("• Low temperature: 1.0°C (threshold 5.0°C)"));

        let las_palmas = message.find("Las Palmas").unwrap();
        let humidity = message.find("Extreme humidity").unwrap();
        let santa_cruz = message.find("Santa").unwrap();
        assert!(las_palmas < humidity && humidity < santa_cruz);
    }
}
