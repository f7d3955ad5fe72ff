//! External API integrations

pub mod telegram;
pub mod weather;

pub use telegram::TelegramClient;
pub use weather::{parse_forecast_batch, ForecastSource, WeatherClient};
