//! Alert evaluation tests
//!
//! Tests for the alert loop including:
//! - Cadence gate
//! - Threshold crossing with overrides and defaults
//! - Relevant forecast selection
//! - Dispatch bookkeeping only on confirmed delivery

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{
    AlertKind, AlertThresholds, ForecastEntry, GpsCoordinates, Location, StoredForecastRecord,
    SubscriberPreferences,
};
use tokio::sync::Mutex;
use weather_alerts_backend::error::DispatchError;
use weather_alerts_backend::services::{
    AlertEvaluator, EvaluationOutcome, NotificationDispatcher, RetryPolicy, RetryingDispatcher,
};
use weather_alerts_backend::store::{
    ForecastStore, InMemoryForecastStore, InMemorySubscriberStore, SubscriberStore, WriteOp,
};

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn now() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

fn testville() -> Location {
    Location::new("testville", "Testville", GpsCoordinates::new(dec("28.1"), dec("-15.4")))
}

fn entry_at(at: DateTime<Utc>, temp: &str, humidity: i32) -> ForecastEntry {
    ForecastEntry {
        forecast_time: at,
        temperature_celsius: dec(temp),
        feels_like_celsius: dec(temp),
        humidity_percent: humidity,
        pressure_hpa: 1013,
        wind_speed_mps: dec("2.0"),
        wind_direction_deg: 90,
        cloud_coverage_percent: 0,
        precipitation_mm: Decimal::ZERO,
        condition_code: 800,
        condition: "Clear".to_string(),
        description: "clear sky".to_string(),
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: StdDuration::from_millis(1),
        max_delay: StdDuration::from_millis(2),
        max_total_wait: StdDuration::from_millis(10),
    }
}

/// Records every delivered message, or rejects all of them
#[derive(Default)]
struct RecordingDispatcher {
    sent: Mutex<Vec<(String, String)>>,
    reject: bool,
}

impl RecordingDispatcher {
    fn rejecting() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            reject: true,
        }
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn deliver(&self, destination: &str, text: &str) -> Result<(), DispatchError> {
        if self.reject {
            return Err(DispatchError::Rejected {
                status: 502,
                description: "Bad Gateway".to_string(),
            });
        }
        self.sent
            .lock()
            .await
            .push((destination.to_string(), text.to_string()));
        Ok(())
    }
}

struct Harness {
    forecasts: Arc<InMemoryForecastStore>,
    subscribers: Arc<InMemorySubscriberStore>,
    dispatcher: Arc<RecordingDispatcher>,
    evaluator: Arc<AlertEvaluator>,
}

fn harness(dispatcher: RecordingDispatcher) -> Harness {
    let forecasts = Arc::new(InMemoryForecastStore::new());
    let subscribers = Arc::new(InMemorySubscriberStore::new());
    let dispatcher = Arc::new(dispatcher);

    let evaluator = Arc::new(AlertEvaluator::new(
        forecasts.clone(),
        subscribers.clone(),
        RetryingDispatcher::new(dispatcher.clone(), fast_policy()),
        vec![testville()],
        AlertThresholds::default(),
    ));

    Harness {
        forecasts,
        subscribers,
        dispatcher,
        evaluator,
    }
}

async fn store_forecasts(store: &InMemoryForecastStore, entries: Vec<ForecastEntry>) {
    let ops = entries
        .into_iter()
        .map(|e| WriteOp::Insert(StoredForecastRecord::first_seen(&testville(), e, now())))
        .collect();
    store.bulk_write(ops).await.unwrap();
}

async fn subscribe(store: &InMemorySubscriberStore, prefs: SubscriberPreferences) {
    store.insert(prefs).await;
}

fn testville_subscriber() -> SubscriberPreferences {
    let mut prefs = SubscriberPreferences::with_defaults("1001", 3600, now() - Duration::days(1));
    prefs.add_location("Testville");
    prefs
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Notified 1800s ago with a 3600s cadence: nothing is evaluated
    #[tokio::test]
    async fn test_cadence_not_elapsed_is_gated() {
        let h = harness(RecordingDispatcher::default());
        store_forecasts(&h.forecasts, vec![entry_at(now() + Duration::hours(1), "40.0", 50)]).await;

        let mut prefs = testville_subscriber();
        prefs.last_alert_sent = Some(now() - Duration::seconds(1800));
        subscribe(&h.subscribers, prefs.clone()).await;

        let outcome = h.evaluator.evaluate_subscriber(&prefs, now()).await.unwrap();
        assert_eq!(outcome, EvaluationOutcome::Gated);
        assert!(h.dispatcher.sent.lock().await.is_empty());
    }

    /// Notified 3700s ago with a 3600s cadence: evaluated and dispatched
    #[tokio::test]
    async fn test_cadence_elapsed_is_evaluated() {
        let h = harness(RecordingDispatcher::default());
        store_forecasts(&h.forecasts, vec![entry_at(now() + Duration::hours(1), "40.0", 50)]).await;

        let mut prefs = testville_subscriber();
        prefs.last_alert_sent = Some(now() - Duration::seconds(3700));
        subscribe(&h.subscribers, prefs.clone()).await;

        let outcome = h.evaluator.evaluate_subscriber(&prefs, now()).await.unwrap();
        assert_eq!(outcome, EvaluationOutcome::Dispatched { events: 1 });
    }

    /// 31°C crosses the 30°C default, 29°C does not
    #[tokio::test]
    async fn test_default_threshold_crossing() {
        let h = harness(RecordingDispatcher::default());
        let prefs = testville_subscriber();

        store_forecasts(&h.forecasts, vec![entry_at(now() + Duration::hours(1), "29.0", 50)]).await;
        let events = h.evaluator.collect_events(&prefs, now()).await.unwrap();
        assert!(events.is_empty());

        store_forecasts(&h.forecasts, vec![entry_at(now() + Duration::hours(1), "31.0", 50)]).await;
        let events = h.evaluator.collect_events(&prefs, now()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertKind::HighTemperature);
    }

    /// The next upcoming slot is evaluated, not the one that already passed
    #[tokio::test]
    async fn test_upcoming_forecast_is_evaluated() {
        let h = harness(RecordingDispatcher::default());
        store_forecasts(
            &h.forecasts,
            vec![
                entry_at(now() - Duration::seconds(100), "40.0", 50),
                entry_at(now() + Duration::seconds(200), "20.0", 50),
            ],
        )
        .await;

        let events = h.evaluator.collect_events(&testville_subscriber(), now()).await.unwrap();
        assert!(events.is_empty());
    }

    /// With only past slots, the latest one is evaluated
    #[tokio::test]
    async fn test_latest_past_forecast_is_fallback() {
        let h = harness(RecordingDispatcher::default());
        store_forecasts(
            &h.forecasts,
            vec![
                entry_at(now() - Duration::seconds(100), "20.0", 50),
                entry_at(now() - Duration::seconds(50), "40.0", 50),
            ],
        )
        .await;

        let events = h.evaluator.collect_events(&testville_subscriber(), now()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].forecast_time, now() - Duration::seconds(50));
    }

    /// Locations without stored data are skipped
    #[tokio::test]
    async fn test_location_without_data_is_skipped() {
        let h = harness(RecordingDispatcher::default());
        let outcome = h
            .evaluator
            .evaluate_subscriber(&testville_subscriber(), now())
            .await
            .unwrap();
        assert_eq!(outcome, EvaluationOutcome::NoViolation);
    }

    /// Testville at 36.0°C with a 35°C override: one alert, recorded
    #[tokio::test]
    async fn test_end_to_end_dispatch() {
        let h = harness(RecordingDispatcher::default());
        let slot = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        store_forecasts(&h.forecasts, vec![entry_at(slot, "36.0", 50)]).await;

        let mut prefs = testville_subscriber();
        prefs.set_threshold(AlertKind::HighTemperature, dec("35"));
        subscribe(&h.subscribers, prefs).await;

        let report = h.evaluator.run_cycle(now()).await;
        assert_eq!(report.subscribers, 1);
        assert_eq!(report.dispatched, 1);

        let sent = h.dispatcher.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "1001");
        assert!(sent[0].1.contains("*Testville*"));
        assert!(sent[0].1.contains("36.0°C"));
        assert!(sent[0].1.contains("(threshold 35.0°C)"));

        let stored = h.subscribers.get("1001").await.unwrap().unwrap();
        assert_eq!(stored.last_alert_sent, Some(now()));
        assert_eq!(stored.alert_history.len(), 1);
        assert_eq!(stored.alert_history[0].events.len(), 1);
        assert_eq!(stored.alert_history[0].events[0].observed, dec("36.0"));
    }

    /// A second tick right after a dispatch is gated
    #[tokio::test]
    async fn test_second_tick_is_gated() {
        let h = harness(RecordingDispatcher::default());
        store_forecasts(&h.forecasts, vec![entry_at(now() + Duration::hours(1), "36.0", 50)]).await;
        subscribe(&h.subscribers, testville_subscriber()).await;

        h.evaluator.run_cycle(now()).await;
        let report = h.evaluator.run_cycle(now() + Duration::seconds(60)).await;

        assert_eq!(report.gated, 1);
        assert_eq!(h.dispatcher.sent.lock().await.len(), 1);
    }

    /// Failed delivery leaves the subscriber untouched so the next tick retries
    #[tokio::test]
    async fn test_failed_dispatch_changes_nothing() {
        let h = harness(RecordingDispatcher::rejecting());
        store_forecasts(&h.forecasts, vec![entry_at(now() + Duration::hours(1), "36.0", 50)]).await;
        subscribe(&h.subscribers, testville_subscriber()).await;

        let report = h.evaluator.run_cycle(now()).await;
        assert_eq!(report.dispatch_failed, 1);

        let stored = h.subscribers.get("1001").await.unwrap().unwrap();
        assert_eq!(stored.last_alert_sent, None);
        assert!(stored.alert_history.is_empty());
    }

    /// A dispatch recorded concurrently is not recorded twice
    #[tokio::test]
    async fn test_concurrent_record_is_superseded() {
        let h = harness(RecordingDispatcher::default());
        store_forecasts(&h.forecasts, vec![entry_at(now() + Duration::hours(1), "36.0", 50)]).await;
        let prefs = testville_subscriber();
        subscribe(&h.subscribers, prefs.clone()).await;

        // Another tick already delivered from the same snapshot
        h.evaluator.evaluate_subscriber(&prefs, now()).await.unwrap();
        let outcome = h.evaluator.evaluate_subscriber(&prefs, now()).await.unwrap();

        assert_eq!(outcome, EvaluationOutcome::Superseded);
        let stored = h.subscribers.get("1001").await.unwrap().unwrap();
        assert_eq!(stored.alert_history.len(), 1);
    }

    /// Unknown monitored locations are ignored
    #[tokio::test]
    async fn test_unknown_location_is_skipped() {
        let h = harness(RecordingDispatcher::default());
        let mut prefs = SubscriberPreferences::with_defaults("7", 3600, now());
        prefs.add_location("Atlantis");

        let events = h.evaluator.collect_events(&prefs, now()).await.unwrap();
        assert!(events.is_empty());
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// High temperature fires exactly when the forecast is above the threshold
        #[test]
        fn prop_high_temperature_fires_above_threshold(
            temp_tenths in -200i64..500,
            threshold_tenths in -200i64..500,
        ) {
            let temp = Decimal::new(temp_tenths, 1);
            let threshold = Decimal::new(threshold_tenths, 1);

            let fired = tokio_test::block_on(async {
                let h = harness(RecordingDispatcher::default());
                let mut entry = entry_at(now() + Duration::hours(1), "0", 50);
                entry.temperature_celsius = temp;
                store_forecasts(&h.forecasts, vec![entry]).await;

                let mut prefs = testville_subscriber();
                prefs.alerts.insert(AlertKind::LowTemperature, false);
                prefs.set_threshold(AlertKind::HighTemperature, threshold);

                h.evaluator.collect_events(&prefs, now()).await.unwrap().len()
            });

            prop_assert_eq!(fired == 1, temp > threshold);
        }
    }
}
