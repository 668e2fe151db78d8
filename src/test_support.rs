//! Test doubles shared by unit and integration tests.
//!
//! [`VirtualTimeProvider`] is the deterministic clock mandated by the
//! Design Notes: no test in this crate sleeps on the wall clock. It is a
//! real part of the crate's public surface (not `#[cfg(test)]`-gated)
//! because spec.md §4.5.3's synchronization protocol is itself testable
//! surface that downstream integration tests need to construct.

use crate::context::{ProcessingContext, ProcessingResult};
use crate::error::{ErrorInfo, ErrorKind};
use crate::message::Envelope;
use crate::pipeline::Processor;
use crate::ports::MetricsSink;
use crate::time::TimeProvider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// A clock whose value only moves when [`VirtualTimeProvider::advance`] is
/// called. `delay` suspends until the virtual clock has moved past the
/// requested deadline or the cancellation token fires.
pub struct VirtualTimeProvider {
    origin_instant: Instant,
    origin_timestamp: DateTime<Utc>,
    offset: Mutex<Duration>,
    notify: Notify,
}

impl VirtualTimeProvider {
    pub fn new() -> Self {
        Self {
            origin_instant: Instant::now(),
            origin_timestamp: Utc::now(),
            offset: Mutex::new(Duration::ZERO),
            notify: Notify::new(),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock();
        *offset += by;
        drop(offset);
        self.notify.notify_waiters();
    }

    fn current_offset(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for VirtualTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VirtualTimeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualTimeProvider")
            .field("offset", &self.current_offset())
            .finish()
    }
}

#[async_trait]
impl TimeProvider for VirtualTimeProvider {
    fn now(&self) -> Instant {
        self.origin_instant + self.current_offset()
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.origin_timestamp + chrono::Duration::from_std(self.current_offset()).unwrap_or_default()
    }

    async fn delay(&self, duration: Duration, cancellation: &CancellationToken) -> bool {
        let deadline = self.current_offset() + duration;
        loop {
            if self.current_offset() >= deadline {
                return true;
            }
            tokio::select! {
                _ = self.notify.notified() => continue,
                _ = cancellation.cancelled() => return false,
            }
        }
    }
}

/// In-memory [`MetricsSink`] double that records every call it receives, so
/// tests can assert on what a decorator chain actually reported instead of
/// only on the final `ProcessingResult`.
#[derive(Debug, Default)]
pub struct RecordingMetricsSink {
    counters: Mutex<Vec<(String, u64)>>,
    durations: Mutex<Vec<(String, Duration)>>,
    values: Mutex<Vec<(String, f64)>>,
}

impl RecordingMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn values_named(&self, name: &str) -> Vec<f64> {
        self.values.lock().iter().filter(|(n, _)| n == name).map(|(_, v)| *v).collect()
    }

    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters.lock().iter().filter(|(n, _)| n == name).map(|(_, v)| *v).sum()
    }
}

impl MetricsSink for RecordingMetricsSink {
    fn increment_counter(&self, name: &str, delta: u64) {
        self.counters.lock().push((name.to_string(), delta));
    }

    fn record_duration(&self, name: &str, duration: Duration) {
        self.durations.lock().push((name.to_string(), duration));
    }

    fn record_value(&self, name: &str, value: f64) {
        self.values.lock().push((name.to_string(), value));
    }
}

/// Terminal processor stub that always succeeds.
pub struct SucceedingProcessor;

#[async_trait]
impl<T, R> Processor<T, R> for SucceedingProcessor
where
    T: Send + Sync + 'static,
    R: Send + Sync + Default + 'static,
{
    async fn process(
        &self,
        _envelope: &Envelope<T>,
        _context: ProcessingContext,
        _cancellation: &CancellationToken,
    ) -> ProcessingResult<R> {
        ProcessingResult::with_response(R::default())
    }
}

/// Terminal processor stub that always fails with a transient error.
pub struct FailingProcessor;

#[async_trait]
impl<T, R> Processor<T, R> for FailingProcessor
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    async fn process(
        &self,
        _envelope: &Envelope<T>,
        _context: ProcessingContext,
        _cancellation: &CancellationToken,
    ) -> ProcessingResult<R> {
        ProcessingResult::failed(ErrorInfo::new(ErrorKind::Transient, "simulated failure"), "simulated failure")
    }
}

/// Processor stub that fails `fail_times` times then succeeds, used by the
/// retry-decorator scenario in spec.md §8 ("retry succeeds on third
/// attempt").
pub struct FlakyProcessor {
    remaining_failures: Mutex<u32>,
    invocations: std::sync::atomic::AtomicU32,
}

impl FlakyProcessor {
    pub fn new(fail_times: u32) -> Self {
        Self {
            remaining_failures: Mutex::new(fail_times),
            invocations: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn invocation_count(&self) -> u32 {
        self.invocations.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl<T, R> Processor<T, R> for FlakyProcessor
where
    T: Send + Sync + 'static,
    R: Send + Sync + Default + 'static,
{
    async fn process(
        &self,
        _envelope: &Envelope<T>,
        _context: ProcessingContext,
        _cancellation: &CancellationToken,
    ) -> ProcessingResult<R> {
        self.invocations.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut remaining = self.remaining_failures.lock();
        if *remaining > 0 {
            *remaining -= 1;
            ProcessingResult::failed(ErrorInfo::new(ErrorKind::Transient, "timeout"), "timeout")
        } else {
            ProcessingResult::with_response(R::default())
        }
    }
}
