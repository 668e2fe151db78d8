//! CircuitBreakerDecorator (spec.md §4.2.7, §3 "CircuitBreakerState").
//!
//! State transitions are serialized by a single lock held only around pure
//! bookkeeping; it is never held across the inner `process` call
//! (spec.md §5 "Concurrency & Resource Model").

use super::Processor;
use crate::context::{ProcessingContext, ProcessingResult};
use crate::error::{ErrorInfo, ErrorKind};
use crate::message::Envelope;
use crate::time::TimeProvider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub minimum_throughput: u32,
    pub failure_rate_threshold: f64,
    pub sampling_duration: Duration,
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            minimum_throughput: 10,
            failure_rate_threshold: 0.5,
            sampling_duration: Duration::from_secs(60),
            break_duration: Duration::from_secs(30),
        }
    }
}

struct Sample {
    timestamp: DateTime<Utc>,
    success: bool,
}

struct CircuitBreakerState {
    current_state: CircuitState,
    last_state_change: DateTime<Utc>,
    half_open_successes: u32,
    samples: VecDeque<Sample>,
}

/// Consecutive half-open successes required before closing (spec.md §4.2.7
/// "on reaching 3, transition to Closed").
const HALF_OPEN_SUCCESS_THRESHOLD: u32 = 3;

pub struct CircuitBreakerDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    inner: Arc<dyn Processor<T, R>>,
    config: CircuitBreakerConfig,
    time_provider: Arc<dyn TimeProvider>,
    state: Mutex<CircuitBreakerState>,
}

impl<T, R> CircuitBreakerDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn new(inner: Arc<dyn Processor<T, R>>, config: CircuitBreakerConfig, time_provider: Arc<dyn TimeProvider>) -> Self {
        let now = time_provider.timestamp();
        Self {
            inner,
            config,
            time_provider,
            state: Mutex::new(CircuitBreakerState {
                current_state: CircuitState::Closed,
                last_state_change: now,
                half_open_successes: 0,
                samples: VecDeque::new(),
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().current_state
    }

    /// Returns `Ok(())` if the call is allowed, or `Err` if it must be
    /// rejected with a PolicyDenied failure.
    fn check_allowed(&self) -> Result<(), ()> {
        let now = self.time_provider.timestamp();
        let mut state = self.state.lock();
        match state.current_state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = now.signed_duration_since(state.last_state_change);
                if elapsed.to_std().unwrap_or(Duration::ZERO) >= self.config.break_duration {
                    state.current_state = CircuitState::HalfOpen;
                    state.last_state_change = now;
                    state.half_open_successes = 0;
                    info!("circuit breaker: Open -> HalfOpen");
                    Ok(())
                } else {
                    Err(())
                }
            }
        }
    }

    fn record(&self, success: bool) {
        let now = self.time_provider.timestamp();
        let mut state = self.state.lock();

        state.samples.push_back(Sample { timestamp: now, success });
        let cutoff = now - chrono::Duration::from_std(self.config.sampling_duration).unwrap_or_default();
        while let Some(front) = state.samples.front() {
            if front.timestamp < cutoff {
                state.samples.pop_front();
            } else {
                break;
            }
        }

        match state.current_state {
            CircuitState::Closed => {
                let total = state.samples.len() as u32;
                let failures = state.samples.iter().filter(|s| !s.success).count() as u32;
                let failure_rate = if total > 0 { failures as f64 / total as f64 } else { 0.0 };
                if total >= self.config.minimum_throughput
                    && (failures >= self.config.failure_threshold || failure_rate >= self.config.failure_rate_threshold)
                {
                    state.current_state = CircuitState::Open;
                    state.last_state_change = now;
                    warn!(failures, total, "circuit breaker: Closed -> Open");
                }
            }
            CircuitState::HalfOpen => {
                if success {
                    state.half_open_successes += 1;
                    if state.half_open_successes >= HALF_OPEN_SUCCESS_THRESHOLD {
                        state.current_state = CircuitState::Closed;
                        state.last_state_change = now;
                        state.samples.clear();
                        info!("circuit breaker: HalfOpen -> Closed");
                    }
                } else {
                    state.current_state = CircuitState::Open;
                    state.last_state_change = now;
                    state.half_open_successes = 0;
                    warn!("circuit breaker: HalfOpen -> Open on failure");
                }
            }
            CircuitState::Open => {}
        }
    }
}

#[async_trait]
impl<T, R> Processor<T, R> for CircuitBreakerDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    async fn process(
        &self,
        envelope: &Envelope<T>,
        context: ProcessingContext,
        cancellation: &CancellationToken,
    ) -> ProcessingResult<R> {
        if self.check_allowed().is_err() {
            return ProcessingResult::failed(
                ErrorInfo::new(ErrorKind::PolicyDenied, "circuit breaker open").with_retry_after(self.config.break_duration),
                "circuit open",
            );
        }

        let result = self.inner.process(envelope, context, cancellation).await;
        self.record(result.success);
        result
    }
}
