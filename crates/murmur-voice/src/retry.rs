//! Bounded retry shared by the recognition and synthesis stages.

use crate::error::VoiceError;
use std::future::Future;
use std::time::Duration;

/// Attempt cap, fixed inter-attempt delay, and retryable-error predicate.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    retry_on: fn(&VoiceError) -> bool,
}

/// Result of running an operation under a [`RetryPolicy`].
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, VoiceError>,
    /// Attempts actually made, including the final one.
    pub attempts: u32,
}

fn retry_unless_validation(err: &VoiceError) -> bool {
    !err.is_validation()
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, delay: Duration, retry_on: fn(&VoiceError) -> bool) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            retry_on,
        }
    }

    /// Retries only resource-class faults, pausing `delay` between attempts.
    pub fn transient_only(max_attempts: u32, delay: Duration) -> Self {
        Self::new(max_attempts, delay, VoiceError::is_transient)
    }

    /// Retries everything except validation failures, back to back.
    pub fn all_but_validation(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, retry_unless_validation)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn should_retry(&self, err: &VoiceError) -> bool {
        (self.retry_on)(err)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt cap is reached. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, VoiceError>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(e) if attempt < self.max_attempts && self.should_retry(&e) => {
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                    attempt += 1;
                }
                Err(e) => {
                    return RetryOutcome {
                        result: Err(e),
                        attempts: attempt,
                    }
                }
            }
        }
    }
}
