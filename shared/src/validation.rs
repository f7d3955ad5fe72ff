//! Validation utilities for the weather alerting platform
//!
//! Forecast payloads are checked here before anything reaches storage, and
//! subscriber supplied values are checked before they are persisted.

use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;

use crate::models::{AlertKind, Location};

// ============================================================================
// Forecast Payload Validation
// ============================================================================

/// Reason a forecast payload was rejected
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("payload has no forecast list")]
    MissingEntries,

    #[error("forecast list is empty")]
    EmptyEntries,

    #[error("payload has no location identity")]
    MissingLocation,

    #[error("entry {index} is missing field `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("entry {index} has no weather condition")]
    MissingCondition { index: usize },

    #[error("entry {index} could not be decoded: {reason}")]
    Malformed { index: usize, reason: String },
}

/// Validate a raw forecast payload.
///
/// Rejects payloads without a `list` array, without a `city` carrying a name
/// or id, or whose first entry lacks `dt`, the `main.temp` bundle, or a
/// non-empty `weather` array.
pub fn validate_forecast_payload(payload: &Value) -> Result<(), PayloadError> {
    let object = payload.as_object().ok_or(PayloadError::NotAnObject)?;

    let entries = object
        .get("list")
        .and_then(Value::as_array)
        .ok_or(PayloadError::MissingEntries)?;

    let city = object.get("city").and_then(Value::as_object);
    let has_identity = city.map_or(false, |city| {
        city.get("name").and_then(Value::as_str).map_or(false, |name| !name.is_empty())
            || city.get("id").map_or(false, |id| !id.is_null())
    });
    if !has_identity {
        return Err(PayloadError::MissingLocation);
    }

    let first = entries.first().ok_or(PayloadError::EmptyEntries)?;
    validate_forecast_entry(first, 0)
}

/// Minimal field check for a single forecast entry
pub fn validate_forecast_entry(entry: &Value, index: usize) -> Result<(), PayloadError> {
    if !entry.get("dt").map_or(false, Value::is_i64) {
        return Err(PayloadError::MissingField { index, field: "dt" });
    }

    let main = entry
        .get("main")
        .and_then(Value::as_object)
        .ok_or(PayloadError::MissingField { index, field: "main" })?;
    if !main.get("temp").map_or(false, Value::is_number) {
        return Err(PayloadError::MissingField {
            index,
            field: "main.temp",
        });
    }

    let has_condition = entry
        .get("weather")
        .and_then(Value::as_array)
        .map_or(false, |weather| !weather.is_empty());
    if !has_condition {
        return Err(PayloadError::MissingCondition { index });
    }

    Ok(())
}

// ============================================================================
// Configuration and Preference Validation
// ============================================================================

/// Validate a configured location
pub fn validate_location(location: &Location) -> Result<(), &'static str> {
    if location.id.trim().is_empty() {
        return Err("Location id must not be empty");
    }
    if location.name.trim().is_empty() {
        return Err("Location name must not be empty");
    }
    if !location.coordinates().is_valid() {
        return Err("Location coordinates are out of range");
    }
    Ok(())
}

/// Validate a subscriber supplied threshold for an alert kind
pub fn validate_threshold(kind: AlertKind, value: Decimal) -> Result<(), &'static str> {
    match kind {
        AlertKind::HighTemperature | AlertKind::LowTemperature => {
            if value < Decimal::from(-90) || value > Decimal::from(60) {
                return Err("Temperature threshold must be between -90 and 60 °C");
            }
        }
        AlertKind::HighHumidity => {
            if value < Decimal::ZERO || value > Decimal::from(100) {
                return Err("Humidity threshold must be between 0 and 100%");
            }
        }
        AlertKind::HighWind | AlertKind::HeavyRain => {
            if value < Decimal::ZERO {
                return Err("Threshold cannot be negative");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GpsCoordinates;
    use serde_json::json;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn valid_payload() -> Value {
        json!({
            "cod": "200",
            "list": [{
                "dt": 1700000000,
                "main": { "temp": 21.4, "feels_like": 21.0, "pressure": 1015, "humidity": 64 },
                "weather": [{ "id": 801, "main": "Clouds", "description": "few clouds" }],
                "wind": { "speed": 5.1, "deg": 40 }
            }],
            "city": { "id": 2515270, "name": "Las Palmas de Gran Canaria" }
        })
    }

    // ========================================================================
    // Payload Validation Tests
    // ========================================================================

    #[test]
    fn test_valid_payload() {
        assert!(validate_forecast_payload(&valid_payload()).is_ok());
    }

    #[test]
    fn test_missing_list() {
        let mut payload = valid_payload();
        payload.as_object_mut().unwrap().remove("list");
        assert_eq!(validate_forecast_payload(&payload), Err(PayloadError::MissingEntries));
    }

    #[test]
    fn test_empty_list() {
        let mut payload = valid_payload();
        payload["list"] = json!([]);
        assert_eq!(validate_forecast_payload(&payload), Err(PayloadError::EmptyEntries));
    }

    #[test]
    fn test_missing_city() {
        let mut payload = valid_payload();
        payload.as_object_mut().unwrap().remove("city");
        assert_eq!(validate_forecast_payload(&payload), Err(PayloadError::MissingLocation));
    }

    #[test]
    fn test_city_with_id_only() {
        let mut payload = valid_payload();
        payload["city"] = json!({ "id": 12 });
        assert!(validate_forecast_payload(&payload).is_ok());
    }

    #[test]
    fn test_missing_timestamp() {
        let mut payload = valid_payload();
        payload["list"][0].as_object_mut().unwrap().remove("dt");
        assert_eq!(
            validate_forecast_payload(&payload),
            Err(PayloadError::MissingField { index: 0, field: "dt" })
        );
    }

    #[test]
    fn test_missing_temperature() {
        let mut payload = valid_payload();
        payload["list"][0]["main"].as_object_mut().unwrap().remove("temp");
        assert_eq!(
            validate_forecast_payload(&payload),
            Err(PayloadError::MissingField { index: 0, field: "main.temp" })
        );
    }

    #[test]
    fn test_empty_weather_conditions() {
        let mut payload = valid_payload();
        payload["list"][0]["weather"] = json!([]);
        assert_eq!(
            validate_forecast_payload(&payload),
            Err(PayloadError::MissingCondition { index: 0 })
        );
    }

    #[test]
    fn test_not_an_object() {
        assert_eq!(validate_forecast_payload(&json!([1, 2])), Err(PayloadError::NotAnObject));
    }

    // ========================================================================
    // Preference Validation Tests
    // ========================================================================

    #[test]
    fn test_validate_location() {
        let ok = Location::new("lpa", "Las Palmas", GpsCoordinates::new(dec("28.151286"), dec("-15.427340")));
        assert!(validate_location(&ok).is_ok());

        let bad = Location::new("x", "Nowhere", GpsCoordinates::new(dec("95"), dec("0")));
        assert!(validate_location(&bad).is_err());

        let unnamed = Location::new("x", " ", GpsCoordinates::new(dec("1"), dec("1")));
        assert!(validate_location(&unnamed).is_err());
    }

    #[test]
    fn test_validate_threshold() {
        assert!(validate_threshold(AlertKind::HighTemperature, dec("35")).is_ok());
        assert!(validate_threshold(AlertKind::HighHumidity, dec("101")).is_err());
        assert!(validate_threshold(AlertKind::HeavyRain, dec("-1")).is_err());
        assert!(validate_threshold(AlertKind::LowTemperature, dec("-100")).is_err());
    }
}
