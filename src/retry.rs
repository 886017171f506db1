//! Exponential-backoff retry for calls to external services.
//!
//! The engine only classifies and delays. It never logs; every failed attempt is handed
//! to an observer so the caller can record it.

use crate::failure::{classify, Classify, ClassifiedError, ErrorClassification};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Backoff configuration. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    backoff_multiplier: f64,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Why a retry policy could not be built.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    #[error("max_attempts must be at least 1")]
    NoAttempts,
    #[error("backoff_multiplier must be a finite number >= 1.0, got {0}")]
    InvalidMultiplier(f64),
    #[error("initial_delay ({initial:?}) must not exceed max_delay ({max:?})")]
    DelayOutOfRange { initial: Duration, max: Duration },
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        backoff_multiplier: f64,
        max_delay: Duration,
    ) -> Result<Self, PolicyError> {
        if max_attempts == 0 {
            return Err(PolicyError::NoAttempts);
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(PolicyError::InvalidMultiplier(backoff_multiplier));
        }
        if initial_delay > max_delay {
            return Err(PolicyError::DelayOutOfRange {
                initial: initial_delay,
                max: max_delay,
            });
        }
        Ok(Self {
            max_attempts,
            initial_delay,
            backoff_multiplier,
            max_delay,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Delay that follows `delay`, capped at `max_delay`.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        let next = delay.as_secs_f64() * self.backoff_multiplier;
        let capped = next.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// The sleeps taken between attempts, in order (`max_attempts - 1` entries).
    pub fn delays(&self) -> Vec<Duration> {
        let mut delays = Vec::new();
        let mut delay = self.initial_delay.min(self.max_delay);
        for _ in 1..self.max_attempts {
            delays.push(delay);
            delay = self.next_delay(delay);
        }
        delays
    }
}

/// One failed attempt, reported to the caller's observer.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub attempt: u32,
    pub max_attempts: u32,
    pub classification: ErrorClassification,
    pub detail: String,
    /// Sleep before the next attempt; `None` when this was the final attempt.
    pub next_delay: Option<Duration>,
}

/// Runs `operation` under `policy`, discarding attempt reports.
pub async fn execute<T, E, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, ClassifiedError>
where
    E: Classify,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    execute_with_observer(policy, operation, |_| {}).await
}

/// Runs `operation` under `policy`, reporting every failed attempt to `observer`.
///
/// Non-retryable failures return immediately, without delay, regardless of the attempts
/// left.
pub async fn execute_with_observer<T, E, F, Fut, O>(
    policy: &RetryPolicy,
    mut operation: F,
    mut observer: O,
) -> Result<T, ClassifiedError>
where
    E: Classify,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    O: FnMut(&RetryAttempt),
{
    let mut delay = policy.initial_delay.min(policy.max_delay);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let signal = err.signal();
        let classification = classify(&signal);
        let exhausted = attempt >= policy.max_attempts;
        let give_up = !classification.retryable || exhausted;

        observer(&RetryAttempt {
            attempt,
            max_attempts: policy.max_attempts,
            classification: classification.clone(),
            detail: signal.detail(),
            next_delay: if give_up { None } else { Some(delay) },
        });

        if give_up {
            return Err(ClassifiedError {
                classification,
                detail: signal.detail(),
                attempts: attempt,
            });
        }

        tokio::time::sleep(delay).await;
        delay = policy.next_delay(delay);
    }
}

#[cfg(test)]
#[path = "tests/retry_tests.rs"]
mod tests;
