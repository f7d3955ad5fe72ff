//! Forecast source client
//!
//! Integrates with the OpenWeatherMap 5 day / 3 hour forecast API. The raw
//! JSON document is returned so it can be validated before any typed decoding.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use shared::{ForecastBatch, ForecastEntry, Location, PayloadError, Units};

use crate::config::WeatherConfig;
use crate::error::FetchError;
use crate::services::retry::{RetryOutcome, RetryPolicy};

/// Source of raw forecast documents for a location
#[async_trait]
pub trait ForecastSource: Send + Sync {
    async fn fetch(&self, location: &Location) -> RetryOutcome<Value, FetchError>;
}

/// Weather API client
#[derive(Clone)]
pub struct WeatherClient {
    client: Client,
    api_key: String,
    base_url: String,
    policy: RetryPolicy,
}

/// OpenWeatherMap forecast entry
#[derive(Debug, Deserialize)]
struct OWMForecastItem {
    dt: i64,
    main: OWMMain,
    weather: Vec<OWMWeather>,
    #[serde(default)]
    clouds: Option<OWMClouds>,
    #[serde(default)]
    wind: Option<OWMWind>,
    #[serde(default)]
    rain: Option<OWMPrecipitation>,
    #[serde(default)]
    snow: Option<OWMPrecipitation>,
}

#[derive(Debug, Deserialize)]
struct OWMMain {
    temp: f64,
    feels_like: Option<f64>,
    pressure: i32,
    humidity: i32,
}

#[derive(Debug, Deserialize)]
struct OWMWeather {
    id: i32,
    main: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct OWMWind {
    speed: f64,
    deg: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct OWMClouds {
    all: i32,
}

#[derive(Debug, Deserialize)]
struct OWMPrecipitation {
    #[serde(rename = "3h")]
    three_hour: Option<f64>,
}

impl WeatherClient {
    /// Create a new WeatherClient from configuration
    pub fn new(config: &WeatherConfig, policy: RetryPolicy) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.api_endpoint.trim_end_matches('/').to_string(),
            policy,
        })
    }

    /// Create a new WeatherClient with custom base URL (for testing)
    pub fn with_base_url(api_key: String, base_url: String, policy: RetryPolicy) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
            policy,
        }
    }

    /// Fetch the raw forecast document for a location, retrying transient
    /// failures. Every attempt is timed.
    pub async fn fetch_raw(&self, location: &Location) -> RetryOutcome<Value, FetchError> {
        let label = format!("forecast fetch for {}", location.name);
        self.policy.run(&label, || self.request_once(location)).await
    }

    /// One request to the forecast endpoint
    async fn request_once(&self, location: &Location) -> Result<Value, FetchError> {
        let url = format!("{}/forecast", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("lat", location.latitude.to_string()),
                ("lon", location.longitude.to_string()),
                ("appid", self.api_key.clone()),
                ("units", Units::Metric.as_str().to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!("Weather API error: {} - {}", status, body);
            return Err(FetchError::Status(status.as_u16()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ForecastSource for WeatherClient {
    async fn fetch(&self, location: &Location) -> RetryOutcome<Value, FetchError> {
        self.fetch_raw(location).await
    }
}

/// Decode a validated payload into a batch for `location`.
///
/// Any entry that cannot be decoded rejects the whole batch.
pub fn parse_forecast_batch(
    location: &Location,
    payload: &Value,
    collected_at: DateTime<Utc>,
) -> Result<ForecastBatch, PayloadError> {
    let items = payload
        .get("list")
        .and_then(Value::as_array)
        .ok_or(PayloadError::MissingEntries)?;

    let entries = items
        .iter()
        .enumerate()
        .map(|(index, item)| convert_item(index, item))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ForecastBatch {
        location: location.clone(),
        entries,
        collected_at,
    })
}

fn decimal(index: usize, value: f64) -> Result<Decimal, PayloadError> {
    Decimal::from_f64(value).ok_or_else(|| PayloadError::Malformed {
        index,
        reason: format!("{} is not a finite number", value),
    })
}

/// Convert one OpenWeatherMap list item to our format
fn convert_item(index: usize, item: &Value) -> Result<ForecastEntry, PayloadError> {
    let item: OWMForecastItem =
        serde_json::from_value(item.clone()).map_err(|e| PayloadError::Malformed {
            index,
            reason: e.to_string(),
        })?;

    let forecast_time = DateTime::from_timestamp(item.dt, 0).ok_or_else(|| PayloadError::Malformed {
        index,
        reason: format!("timestamp {} out of range", item.dt),
    })?;
    let weather = item
        .weather
        .into_iter()
        .next()
        .ok_or(PayloadError::MissingCondition { index })?;

    let temperature = decimal(index, item.main.temp)?;
    let feels_like = match item.main.feels_like {
        Some(value) => decimal(index, value)?,
        None => temperature,
    };
    let (wind_speed, wind_direction) = match item.wind {
        Some(wind) => (decimal(index, wind.speed)?, wind.deg.unwrap_or(0)),
        None => (Decimal::ZERO, 0),
    };
    // Rain and snow volume for the 3 hour slot
    let precipitation = [item.rain, item.snow]
        .into_iter()
        .flatten()
        .filter_map(|p| p.three_hour)
        .map(|mm| decimal(index, mm))
        .sum::<Result<Decimal, _>>()?;

    Ok(ForecastEntry {
        forecast_time,
        temperature_celsius: temperature,
        feels_like_celsius: feels_like,
        humidity_percent: item.main.humidity,
        pressure_hpa: item.main.pressure,
        wind_speed_mps: wind_speed,
        wind_direction_deg: wind_direction,
        cloud_coverage_percent: item.clouds.map(|c| c.all).unwrap_or(0),
        precipitation_mm: precipitation,
        condition_code: weather.id,
        condition: weather.main,
        description: weather.description,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::GpsCoordinates;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn testville() -> Location {
        Location::new("testville", "Testville", GpsCoordinates::new(dec("28.1"), dec("-15.4")))
    }

    fn collected_at() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_parse_full_entry() {
        let payload = json!({
            "list": [{
                "dt": 1700000000,
                "main": { "temp": 21.4, "feels_like": 20.9, "pressure": 1015, "humidity": 64 },
                "weather": [{ "id": 500, "main": "Rain", "description": "light rain" }],
                "clouds": { "all": 75 },
                "wind": { "speed": 5.1, "deg": 40 },
                "rain": { "3h": 1.25 },
                "snow": { "3h": 0.5 }
            }],
            "city": { "name": "Testville" }
        });

        let batch = parse_forecast_batch(&testville(), &payload, collected_at()).unwrap();
        assert_eq!(batch.entries.len(), 1);

        let entry = &batch.entries[0];
        assert_eq!(entry.forecast_time.timestamp(), 1_700_000_000);
        assert_eq!(entry.temperature_celsius, dec("21.4"));
        assert_eq!(entry.feels_like_celsius, dec("20.9"));
        assert_eq!(entry.humidity_percent, 64);
        assert_eq!(entry.wind_speed_mps, dec("5.1"));
        assert_eq!(entry.cloud_coverage_percent, 75);
        assert_eq!(entry.precipitation_mm, dec("1.75"));
        assert_eq!(entry.condition_code, 500);
        assert_eq!(entry.description, "light rain");
    }

    #[test]
    fn test_parse_minimal_entry_defaults() {
        let payload = json!({
            "list": [{
                "dt": 1700010800,
                "main": { "temp": 36.0, "pressure": 1009, "humidity": 50 },
                "weather": [{ "id": 800, "main": "Clear", "description": "clear sky" }]
            }],
            "city": { "name": "Testville" }
        });

        let batch = parse_forecast_batch(&testville(), &payload, collected_at()).unwrap();
        let entry = &batch.entries[0];
        assert_eq!(entry.temperature_celsius, dec("36"));
        assert_eq!(entry.feels_like_celsius, entry.temperature_celsius);
        assert_eq!(entry.precipitation_mm, Decimal::ZERO);
        assert_eq!(entry.wind_speed_mps, Decimal::ZERO);
    }

    #[test]
    fn test_later_malformed_entry_rejects_batch() {
        let payload = json!({
            "list": [
                {
                    "dt": 1700000000,
                    "main": { "temp": 20.0, "pressure": 1015, "humidity": 60 },
                    "weather": [{ "id": 800, "main": "Clear", "description": "clear sky" }]
                },
                {
                    "dt": 1700010800,
                    "main": { "pressure": 1015, "humidity": 60 },
                    "weather": [{ "id": 800, "main": "Clear", "description": "clear sky" }]
                }
            ],
            "city": { "name": "Testville" }
        });

        let err = parse_forecast_batch(&testville(), &payload, collected_at()).unwrap_err();
        assert!(matches!(err, PayloadError::Malformed { index: 1, .. }));
    }
}
