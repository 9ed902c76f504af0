//! Retry controller with exponential backoff.
//!
//! Drives up to `max_attempts` invocations of an operation, sleeping
//! between attempts and classifying errors: transport-class faults are
//! retried, rejections are returned immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::InvokeError;
use crate::domain::models::RetryConfig;

/// Progress notification emitted while the controller runs, so the
/// scheduler can mirror the RETRYING and RUNNING transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryNotice {
    /// Backoff started before the given attempt.
    Backoff { next_attempt: u32, delay_ms: u64 },
    /// The given attempt is starting.
    Attempt { attempt: u32 },
}

/// Bounded-attempt executor for a single invocation.
pub struct RetryController {
    config: RetryConfig,
}

impl RetryController {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Backoff before attempt `attempt` (1-indexed), jitter applied:
    /// `min(initial * base^(attempt-1), max)`, multiplied by a uniform
    /// factor in [0.5, 1.5] when jitter is enabled.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay(attempt);
        if !self.config.jitter {
            return base;
        }
        let factor: f64 = rand::rng().random_range(0.5..=1.5);
        Duration::from_millis((base.as_millis() as f64 * factor) as u64)
    }

    /// Run `op` until it succeeds, fails non-retryably, is cancelled, or
    /// the attempt budget is exhausted.
    ///
    /// `op` is called with the 1-indexed attempt number. `notify` receives
    /// a [`RetryNotice`] before every backoff and every attempt after the
    /// first. Exhaustion returns [`InvokeError::RetryExhausted`] carrying
    /// the last cause and the attempt count.
    pub async fn execute<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut notify: impl FnMut(RetryNotice),
        mut op: F,
    ) -> Result<T, InvokeError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, InvokeError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(InvokeError::Cancelled("cancelled before attempt".into()));
            }
            if attempt > 1 {
                notify(RetryNotice::Attempt { attempt });
            }

            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    tracing::debug!(
                        attempt,
                        max_attempts,
                        error = %err,
                        "attempt failed with retryable error"
                    );
                    last_error = Some(err);
                }
            }

            if attempt < max_attempts {
                let delay = self.delay(attempt);
                notify(RetryNotice::Backoff {
                    next_attempt: attempt + 1,
                    delay_ms: delay.as_millis() as u64,
                });
                tokio::select! {
                    () = cancel.cancelled() => {
                        return Err(InvokeError::Cancelled("cancelled during backoff".into()));
                    }
                    () = sleep(delay) => {}
                }
            }
        }

        // max_attempts >= 1 and retryable failures always set last_error.
        let last = last_error.unwrap_or_else(|| InvokeError::Transport("no attempt recorded".into()));
        Err(InvokeError::RetryExhausted {
            attempts: max_attempts,
            last: Box::new(last),
        })
    }
}
