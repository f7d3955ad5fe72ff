//! Collection cycle summary model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a collection cycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// Every location was fetched and synchronized
    Ok,
    /// At least one location failed, the rest were processed
    Partial,
    /// The forecast store became unreachable
    Failed,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Ok => "ok",
            CycleStatus::Partial => "partial",
            CycleStatus::Failed => "failed",
        }
    }
}

/// Diagnostic summary persisted once per collection cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleSummary {
    pub id: Uuid,
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub status: CycleStatus,
    pub locations_processed: u32,
    pub api_calls: u32,
    pub api_errors: u32,
    pub validation_failures: u32,
    pub successful_updates: u32,
    pub failed_updates: u32,
    pub avg_api_time_ms: f64,
    pub avg_db_time_ms: f64,
}
