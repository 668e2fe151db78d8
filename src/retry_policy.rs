//! Retry-delay calculator (spec.md §4.2.8 "Default policy").
//!
//! `delay(n) = min(baseDelay * 2^n * (1 + random[0, jitterFactor]), maxDelay)`.
//! Kept as a trait so the outbox processor and the retry decorator share
//! one calculator, and so tests can swap in a fixed-jitter variant.

use crate::error::ErrorInfo;
use crate::random::{RandomSource, ThreadRandomSource};
use std::sync::Arc;
use std::time::Duration;

pub trait RetryPolicy: Send + Sync {
    /// Next delay before retry attempt `attempt` (1-indexed: the delay
    /// before the first retry is `delay(1)`).
    fn delay(&self, attempt: u32, error: Option<&ErrorInfo>) -> Duration;

    /// Whether the pipeline should attempt another retry at all, given the
    /// attempt number about to be made and the last observed error.
    /// spec.md §4.2.8: false when attempt >= max, error is null, or the
    /// error is a critical class; true for transient classes including
    /// recursive inspection of inner causes.
    fn should_retry(&self, attempt: u32, max_retries: u32, error: Option<&ErrorInfo>) -> bool {
        if attempt >= max_retries {
            return false;
        }
        match error {
            None => false,
            Some(err) => {
                if err.kind == crate::error::ErrorKind::Critical {
                    return false;
                }
                err.is_retryable()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExponentialBackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for ExponentialBackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.25,
        }
    }
}

/// Exponential backoff with jitter, matching spec.md §4.2.8's default
/// policy exactly: `delay(n) = min(base * 2^n * (1 + U[0, jitter]), max)`.
pub struct ExponentialBackoffPolicy {
    config: ExponentialBackoffConfig,
    random: Arc<dyn RandomSource>,
}

impl ExponentialBackoffPolicy {
    pub fn new(config: ExponentialBackoffConfig) -> Self {
        Self {
            config,
            random: Arc::new(ThreadRandomSource),
        }
    }

    pub fn with_random_source(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }
}

impl Default for ExponentialBackoffPolicy {
    fn default() -> Self {
        Self::new(ExponentialBackoffConfig::default())
    }
}

impl RetryPolicy for ExponentialBackoffPolicy {
    fn delay(&self, attempt: u32, _error: Option<&ErrorInfo>) -> Duration {
        let exponent = attempt.min(62);
        let base_nanos = self.config.base_delay.as_nanos() as f64;
        let exponential = base_nanos * 2f64.powi(exponent as i32);
        let jitter = 1.0 + self.random.next_f64() * self.config.jitter_factor;
        let with_jitter = exponential * jitter;
        let capped = with_jitter.min(self.config.max_delay.as_nanos() as f64);
        Duration::from_nanos(capped.max(0.0) as u64)
    }
}
