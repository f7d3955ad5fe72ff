//! Retry policy with exponential backoff.
//!
//! One policy object is applied to every outbound call that may fail
//! transiently: forecast fetches and notification deliveries. Errors decide
//! for themselves whether they are transient through [`Retryable`].
//!
//! It does NOT retry:
//! - 4xx client errors other than 408 and 429
//! - decode failures of a response that did arrive

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// Default retry configuration
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 8000;
pub const DEFAULT_MAX_TOTAL_WAIT_SECS: u64 = 30;

/// Error classification for retry decisions
pub trait Retryable {
    /// Whether another attempt could succeed
    fn is_transient(&self) -> bool;
}

/// Terminal failure of a retried operation
#[derive(Error, Debug)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("permanent failure: {0}")]
    Permanent(E),

    #[error("retry budget spent after {attempts} attempts: {last}")]
    BudgetExceeded { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn last_error(&self) -> &E {
        match self {
            RetryError::Exhausted { last, .. } | RetryError::BudgetExceeded { last, .. } => last,
            RetryError::Permanent(err) => err,
        }
    }
}

/// Result of a retried operation plus the duration of every attempt made
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, RetryError<E>>,
    pub attempt_durations: Vec<Duration>,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempts(&self) -> usize {
        self.attempt_durations.len()
    }

    pub fn into_result(self) -> Result<T, RetryError<E>> {
        self.result
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Delay after the first failed attempt (doubles each attempt)
    pub base_delay: Duration,
    /// Maximum delay between two attempts
    pub max_delay: Duration,
    /// Upper bound on the sum of all delays
    pub max_total_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            max_total_wait: Duration::from_secs(DEFAULT_MAX_TOTAL_WAIT_SECS),
        }
    }
}

impl RetryPolicy {
    /// Calculate the delay after the given failed attempt (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Exponential backoff: base_delay * 2^(attempt - 1)
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempt
    /// or wait budget runs out.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt_durations = Vec::with_capacity(max_attempts as usize);
        let mut waited = Duration::ZERO;
        let mut attempt = 0;

        let result = loop {
            attempt += 1;
            let started = Instant::now();
            let outcome = operation().await;
            attempt_durations.push(started.elapsed());

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!("{} succeeded after {} attempts", label, attempt);
                    }
                    break Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                tracing::debug!("{}: non-retryable error: {}", label, err);
                break Err(RetryError::Permanent(err));
            }

            if attempt >= max_attempts {
                tracing::error!("{}: all {} attempts exhausted: {}", label, attempt, err);
                break Err(RetryError::Exhausted { attempts: attempt, last: err });
            }

            let remaining = self.max_total_wait.saturating_sub(waited);
            if remaining.is_zero() {
                tracing::error!("{}: retry budget spent after {} attempts: {}", label, attempt, err);
                break Err(RetryError::BudgetExceeded { attempts: attempt, last: err });
            }

            let delay = self.delay_for_attempt(attempt).min(remaining);
            tracing::warn!(
                "{}: retryable error on attempt {} of {}, waiting {:?}: {}",
                label,
                attempt,
                max_attempts,
                delay,
                err
            );
            tokio::time::sleep(delay).await;
            waited += delay;
        };

        RetryOutcome {
            result,
            attempt_durations,
        }
    }
}
