//! Notification dispatch
//!
//! The evaluator hands a rendered message and a destination to a
//! [`NotificationDispatcher`]. Retries live in [`RetryingDispatcher`] so every
//! transport gets the same policy.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DispatchError;
use crate::services::retry::{RetryError, RetryPolicy};

/// Delivers a rendered message to a destination
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn deliver(&self, destination: &str, text: &str) -> Result<(), DispatchError>;
}

/// Wraps a dispatcher with the shared retry policy
#[derive(Clone)]
pub struct RetryingDispatcher {
    inner: Arc<dyn NotificationDispatcher>,
    policy: RetryPolicy,
}

impl RetryingDispatcher {
    pub fn new(inner: Arc<dyn NotificationDispatcher>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Deliver with retries. An error is final.
    pub async fn dispatch(&self, destination: &str, text: &str) -> Result<(), RetryError<DispatchError>> {
        let label = format!("alert delivery to {}", destination);
        self.policy
            .run(&label, || self.inner.deliver(destination, text))
            .await
            .into_result()
    }
}

/// Logs messages instead of sending them. Used when no bot token is configured.
#[derive(Debug, Default, Clone)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn deliver(&self, destination: &str, text: &str) -> Result<(), DispatchError> {
        tracing::info!("Alert for {} (not sent, no transport configured):\n{}", destination, text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails a fixed number of times, then succeeds
    struct FlakyDispatcher {
        failures: u32,
        status: u16,
        calls: AtomicU32,
    }

    #[async_trait]
    impl NotificationDispatcher for FlakyDispatcher {
        async fn deliver(&self, _destination: &str, _text: &str) -> Result<(), DispatchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(DispatchError::Rejected {
                    status: self.status,
                    description: "flaky".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            max_total_wait: Duration::from_secs(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_delivery_failure_is_retried() {
        let flaky = Arc::new(FlakyDispatcher {
            failures: 2,
            status: 502,
            calls: AtomicU32::new(0),
        });
        let dispatcher = RetryingDispatcher::new(flaky.clone(), policy());

        assert!(dispatcher.dispatch("42", "hello").await.is_ok());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_delivery_is_final() {
        let flaky = Arc::new(FlakyDispatcher {
            failures: 10,
            status: 400,
            calls: AtomicU32::new(0),
        });
        let dispatcher = RetryingDispatcher::new(flaky.clone(), policy());

        let result = dispatcher.dispatch("42", "hello").await;
        assert!(matches!(result, Err(RetryError::Permanent(_))));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_log_dispatcher_always_succeeds() {
        assert!(LogDispatcher.deliver("42", "hello").await.is_ok());
    }
}
