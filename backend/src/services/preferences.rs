//! Subscriber preference management
//!
//! Lookup-or-create with defaults and validated updates applied in the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use shared::{validate_threshold, PreferencesUpdate, SubscriberPreferences};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::store::SubscriberStore;

/// Preference service
#[derive(Clone)]
pub struct PreferencesService {
    store: Arc<dyn SubscriberStore>,
    default_interval_secs: i64,
    known_locations: Vec<String>,
}

impl PreferencesService {
    pub fn new(
        store: Arc<dyn SubscriberStore>,
        default_interval_secs: i64,
        known_locations: Vec<String>,
    ) -> Self {
        Self {
            store,
            default_interval_secs,
            known_locations,
        }
    }

    /// Preferences of a subscriber, created with defaults on first use
    pub async fn get(&self, subscriber_id: &str, now: DateTime<Utc>) -> AppResult<SubscriberPreferences> {
        Ok(self
            .store
            .get_or_create(subscriber_id, self.default_interval_secs, now)
            .await?)
    }

    /// Validate an update and apply it to the stored document
    pub async fn update(
        &self,
        subscriber_id: &str,
        update: PreferencesUpdate,
        now: DateTime<Utc>,
    ) -> AppResult<SubscriberPreferences> {
        update
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        if let Some((kind, value)) = update.set_threshold {
            validate_threshold(kind, value).map_err(|e| AppError::Validation(e.to_string()))?;
        }
        if let Some(name) = &update.add_location {
            if !self.known_locations.iter().any(|known| known == name) {
                return Err(AppError::NotFound(format!("Location {}", name)));
            }
        }

        let prefs = self
            .store
            .apply_update(subscriber_id, self.default_interval_secs, update, now)
            .await?;

        tracing::debug!("Preferences of {} updated", subscriber_id);
        Ok(prefs)
    }

    /// Make sure a configured subscriber exists and monitors `locations`
    pub async fn seed(
        &self,
        subscriber_id: &str,
        locations: &[String],
        now: DateTime<Utc>,
    ) -> AppResult<SubscriberPreferences> {
        let mut prefs = self.get(subscriber_id, now).await?;
        for name in locations {
            let update = PreferencesUpdate {
                add_location: Some(name.clone()),
                ..Default::default()
            };
            prefs = self.update(subscriber_id, update, now).await?;
        }
        Ok(prefs)
    }
}
