//! Collection, synchronization and alerting services

pub mod alert;
pub mod collector;
pub mod metrics;
pub mod notification;
pub mod preferences;
pub mod retry;
pub mod scheduler;
pub mod sync;

pub use alert::{AlertEvaluator, EvaluationOutcome};
pub use collector::CollectionService;
pub use metrics::CycleMetrics;
pub use notification::{LogDispatcher, NotificationDispatcher, RetryingDispatcher};
pub use preferences::PreferencesService;
pub use retry::{RetryError, RetryPolicy};
pub use scheduler::StatusBoard;
pub use sync::{ForecastSynchronizer, SyncReport};
