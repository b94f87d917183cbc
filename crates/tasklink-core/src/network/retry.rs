//! Retry logic with exponential backoff and jitter.
//!
//! Provides bounded retries for arbitrary async operations with:
//! - Exponential backoff (delay doubles each attempt)
//! - Proportional jitter to prevent thundering herd
//! - A delay cap bounding worst-case latency
//! - A shared retry counter readable by the owning service

use crate::cancel::CancellationToken;
use crate::config::ConnectionDefaults;
use crate::error::{BoxError, ConnectionError, Result};
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first one).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Fraction of the exponential delay added as random jitter (0.0 to 1.0).
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: ConnectionDefaults::MAX_ATTEMPTS,
            base_delay: ConnectionDefaults::BASE_DELAY,
            max_delay: ConnectionDefaults::MAX_DELAY,
            jitter_fraction: ConnectionDefaults::JITTER_FRACTION,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the jitter fraction. Zero disables jitter.
    pub fn with_jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction;
        self
    }

    /// Check that the policy can drive a retry sequence.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ConnectionError::Config {
                message: "max_attempts must be at least 1".to_string(),
            });
        }
        if self.base_delay > self.max_delay {
            return Err(ConnectionError::Config {
                message: format!(
                    "base_delay {:?} exceeds max_delay {:?}",
                    self.base_delay, self.max_delay
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(ConnectionError::Config {
                message: format!("jitter_fraction {} is outside 0.0..=1.0", self.jitter_fraction),
            });
        }
        Ok(())
    }

    /// Delay to wait after the given failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_fraction > 0.0 {
            rand::rng().random::<f64>()
        } else {
            0.0
        };
        self.delay_with_jitter(attempt, jitter)
    }

    /// Delay for a given attempt with an explicit jitter sample in `[0, 1)`.
    ///
    /// `min(base * 2^(attempt-1) * (1 + jitter_fraction * sample), max_delay)`,
    /// never negative.
    pub fn delay_with_jitter(&self, attempt: u32, sample: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let multiplier = 2f64.powi(exponent) * (1.0 + self.jitter_fraction * sample);
        let delay_secs = self.base_delay.as_secs_f64() * multiplier;
        // Out-of-range jitter on an unvalidated policy must not panic below.
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(capped_secs)
    }
}

/// Runs operations under a [`RetryPolicy`].
///
/// The executor emits no events. It only records the number of failed attempts
/// of the current sequence in a counter shared with its owner.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    attempts: Arc<AtomicU32>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Failed attempts in the current sequence, 0 after any success.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Reset the shared retry counter.
    pub fn reset_attempts(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }

    /// Run `operation`, retrying every failure until the policy is exhausted.
    ///
    /// Cancelling `interrupt` lets the running attempt finish but starts no
    /// further attempt and cuts any back-off wait short with
    /// [`ConnectionError::Offline`].
    pub async fn execute<F, Fut, T, E>(
        &self,
        operation: F,
        interrupt: &CancellationToken,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        self.execute_with(operation, interrupt, |_: &E| true).await
    }

    /// Like [`execute`](Self::execute), but only errors accepted by
    /// `should_retry` are retried. Rejected errors fail with
    /// [`ConnectionError::NotRetryable`].
    pub async fn execute_with<F, Fut, T, E>(
        &self,
        mut operation: F,
        interrupt: &CancellationToken,
        should_retry: impl Fn(&E) -> bool,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("Operation succeeded after {} attempts", attempt);
                    }
                    self.reset_attempts();
                    return Ok(value);
                }
                Err(e) => {
                    self.attempts.store(attempt, Ordering::SeqCst);

                    if !should_retry(&e) {
                        let source: BoxError = e.into();
                        debug!("Error is not retryable: {}", source);
                        return Err(ConnectionError::NotRetryable { attempt, source });
                    }

                    let last_error: BoxError = e.into();

                    if attempt >= max_attempts {
                        warn!(
                            "All {} retry attempts exhausted. Last error: {}",
                            max_attempts, last_error
                        );
                        return Err(ConnectionError::RetryExhausted {
                            attempts: attempt,
                            last_error,
                        });
                    }

                    if interrupt.is_cancelled() {
                        debug!("Went offline during attempt {}; not retrying", attempt);
                        return Err(ConnectionError::Offline);
                    }

                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        "Attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt, max_attempts, last_error, delay
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = interrupt.cancelled() => {
                            debug!("Went offline while backing off; abandoning retries");
                            return Err(ConnectionError::Offline);
                        }
                    }

                    attempt += 1;
                }
            }
        }
    }
}
