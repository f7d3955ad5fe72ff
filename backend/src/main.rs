//! Weather alerting service - server binary
//!
//! Runs the forecast collection loop, the alert loop and the operational
//! HTTP surface until Ctrl-C.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use weather_alerts_backend::{
    config::{Config, StorageBackend},
    create_app,
    external::{TelegramClient, WeatherClient},
    services::{
        scheduler::{spawn_alert_loop, spawn_collection_loop},
        AlertEvaluator, CollectionService, ForecastSynchronizer, LogDispatcher,
        NotificationDispatcher, PreferencesService, RetryingDispatcher, StatusBoard,
    },
    store::{
        ForecastStore, InMemoryForecastStore, InMemoryMetricsSink, InMemorySubscriberStore,
        MetricsSink, PgForecastStore, PgMetricsSink, PgSubscriberStore, SubscriberStore,
    },
    AppState,
};

struct Stores {
    forecasts: Arc<dyn ForecastStore>,
    subscribers: Arc<dyn SubscriberStore>,
    metrics: Arc<dyn MetricsSink>,
}

async fn connect_stores(config: &Config) -> anyhow::Result<Stores> {
    if config.storage.backend == StorageBackend::Memory {
        tracing::warn!("Using in-memory storage, data is lost on exit");
        return Ok(Stores {
            forecasts: Arc::new(InMemoryForecastStore::new()),
            subscribers: Arc::new(InMemorySubscriberStore::new()),
            metrics: Arc::new(InMemoryMetricsSink::new()),
        });
    }

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.database.url)
        .await?;

    tracing::info!("Database connection established");

    // Run migrations in development
    if config.is_development() {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&db_pool).await?;
        tracing::info!("Migrations completed");
    }

    Ok(Stores {
        forecasts: Arc::new(PgForecastStore::new(db_pool.clone())),
        subscribers: Arc::new(PgSubscriberStore::new(db_pool.clone())),
        metrics: Arc::new(PgMetricsSink::new(db_pool)),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "wxa_server=debug,weather_alerts_backend=debug,tower_http=debug,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    tracing::info!("Starting Weather Alerts Service");
    tracing::info!("Environment: {}", config.environment);

    let locations = config.monitored_locations();
    for location in &locations {
        if let Err(reason) = shared::validate_location(location) {
            anyhow::bail!("Invalid location {}: {}", location.id, reason);
        }
    }
    if config.weather.api_key.is_empty() {
        tracing::warn!("No weather API key configured, every fetch will be rejected");
    }

    let stores = connect_stores(&config).await?;
    let policy = config.retry.policy();

    // Provision configured subscribers
    let preferences = PreferencesService::new(
        stores.subscribers.clone(),
        config.alerting.default_interval_secs,
        locations.iter().map(|l| l.name.clone()).collect(),
    );
    for seed in &config.subscribers {
        preferences.seed(&seed.id, &seed.locations, chrono::Utc::now()).await?;
        tracing::info!("Subscriber {} ready ({} locations)", seed.id, seed.locations.len());
    }

    // Collection pipeline
    let weather = WeatherClient::new(&config.weather, policy.clone())?;
    let collector = CollectionService::new(
        Arc::new(weather),
        ForecastSynchronizer::new(stores.forecasts.clone()),
        stores.metrics.clone(),
        locations.clone(),
    )
    .with_request_pause(Duration::from_millis(config.collection.request_pause_ms))
    .with_service_name(config.collection.service_name.clone());

    // Alert pipeline
    let transport: Arc<dyn NotificationDispatcher> = match TelegramClient::from_config(&config.telegram)? {
        Some(client) => Arc::new(client),
        None => {
            tracing::warn!("No Telegram bot token configured, alerts will only be logged");
            Arc::new(LogDispatcher)
        }
    };
    let evaluator = Arc::new(AlertEvaluator::new(
        stores.forecasts.clone(),
        stores.subscribers.clone(),
        RetryingDispatcher::new(transport, policy),
        locations,
        config.thresholds.clone(),
    ));

    let status = Arc::new(StatusBoard::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let collection = spawn_collection_loop(
        collector,
        config.collection_interval(),
        status.clone(),
        shutdown_rx.clone(),
    );
    let alerting = spawn_alert_loop(evaluator, config.alert_tick(), status.clone(), shutdown_rx);

    // Create application state
    let state = AppState {
        forecasts: stores.forecasts,
        status,
        config: Arc::new(config.clone()),
    };

    // Build application
    let app = create_app(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown requested, waiting for running cycles");
        })
        .await?;

    shutdown_tx.send(true).ok();
    collection.await?;
    alerting.await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
