//! Configuration management for the weather alerting service
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with WXA_ prefix

use std::time::Duration;

use config::builder::{ConfigBuilder, DefaultState};
use config::{ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use shared::{AlertThresholds, GpsCoordinates, Location};

use crate::services::retry::RetryPolicy;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Operational HTTP surface
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Which store implementation backs the service
    pub storage: StorageConfig,

    /// Forecast provider configuration
    pub weather: WeatherConfig,

    /// Telegram Bot API configuration
    pub telegram: TelegramConfig,

    pub collection: CollectionConfig,

    pub alerting: AlertingConfig,

    /// Retry policy shared by the fetcher and the dispatcher
    pub retry: RetryConfig,

    /// System default alert thresholds
    pub thresholds: AlertThresholds,

    /// Monitored locations
    pub locations: Vec<LocationConfig>,

    /// Subscribers provisioned at startup
    #[serde(default)]
    pub subscribers: Vec<SubscriberSeed>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WeatherConfig {
    /// Weather API endpoint
    pub api_endpoint: String,

    /// Weather API key
    pub api_key: String,

    /// Per-attempt request timeout
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    /// Bot API base URL
    pub api_endpoint: String,

    /// Bot token. Without one, alerts are only logged.
    pub bot_token: Option<String>,

    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectionConfig {
    /// Seconds between collection cycles
    pub interval_secs: u64,

    /// Pause between two provider requests
    pub request_pause_ms: u64,

    /// Service name stamped on every cycle summary
    pub service_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertingConfig {
    /// Seconds between alert evaluation ticks
    pub tick_secs: u64,

    /// Notification cadence given to new subscribers
    pub default_interval_secs: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_total_wait_secs: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_total_wait: Duration::from_secs(self.max_total_wait_secs),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocationConfig {
    pub id: String,
    pub name: String,
    pub latitude: Decimal,
    pub longitude: Decimal,
}

/// A subscriber created at startup, identified by its Telegram chat id
#[derive(Debug, Deserialize, Clone)]
pub struct SubscriberSeed {
    pub id: String,
    #[serde(default)]
    pub locations: Vec<String>,
}

impl From<&LocationConfig> for Location {
    fn from(value: &LocationConfig) -> Self {
        Location::new(
            value.id.clone(),
            value.name.clone(),
            GpsCoordinates::new(value.latitude, value.longitude),
        )
    }
}

/// Locations collected when none are configured
fn default_locations() -> Vec<config::Value> {
    [
        ("las_palmas", "Las Palmas de Gran Canaria", "28.151286", "-15.427340"),
        ("santa_cruz", "Santa Cruz de Tenerife", "28.463163", "-16.251866"),
    ]
    .into_iter()
    .map(|(id, name, latitude, longitude)| {
        let mut table = config::Map::new();
        table.insert("id".to_string(), config::Value::from(id));
        table.insert("name".to_string(), config::Value::from(name));
        table.insert("latitude".to_string(), config::Value::from(latitude));
        table.insert("longitude".to_string(), config::Value::from(longitude));
        config::Value::from(table)
    })
    .collect()
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment = std::env::var("WXA_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config: Config = Self::defaults(&environment)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (WXA_ prefix)
            .add_source(
                Environment::with_prefix("WXA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn defaults(environment: &str) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        config::Config::builder()
            .set_default("environment", environment)?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.url", "postgres://localhost/weather_alerts")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("storage.backend", "postgres")?
            .set_default("weather.api_endpoint", "https://api.openweathermap.org/data/2.5")?
            .set_default("weather.api_key", "")?
            .set_default("weather.request_timeout_secs", 10)?
            .set_default("telegram.api_endpoint", "https://api.telegram.org")?
            .set_default("telegram.request_timeout_secs", 10)?
            .set_default("collection.interval_secs", 3600)?
            .set_default("collection.request_pause_ms", 1000)?
            .set_default("collection.service_name", "weather_collector")?
            .set_default("alerting.tick_secs", 60)?
            .set_default("alerting.default_interval_secs", 3600)?
            .set_default("retry.max_attempts", 5)?
            .set_default("retry.base_delay_ms", 1000)?
            .set_default("retry.max_delay_ms", 8000)?
            .set_default("retry.max_total_wait_secs", 30)?
            .set_default("thresholds.high_temperature", "30.0")?
            .set_default("thresholds.low_temperature", "5.0")?
            .set_default("thresholds.high_wind", "10.0")?
            .set_default("thresholds.high_humidity", "90")?
            .set_default("thresholds.heavy_rain", "10.0")?
            .set_default("locations", default_locations())
    }

    /// Reject settings the loops cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collection.interval_secs == 0 {
            return Err(ConfigError::Message(
                "collection.interval_secs must be at least 1".to_string(),
            ));
        }
        if self.alerting.tick_secs == 0 {
            return Err(ConfigError::Message(
                "alerting.tick_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Configured locations as domain values
    pub fn monitored_locations(&self) -> Vec<Location> {
        self.locations.iter().map(Location::from).collect()
    }

    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection.interval_secs)
    }

    pub fn alert_tick(&self) -> Duration {
        Duration::from_secs(self.alerting.tick_secs)
    }
}
