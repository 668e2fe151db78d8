//! TimeProvider — the single clock abstraction through which all time is
//! read by the core.
//!
//! The Design Notes mandate exactly one clock: no decorator, processor, or
//! accumulator reads `Instant::now()` or `Utc::now()` directly. Everything
//! flows through this trait so that tests can drive a virtual clock instead
//! of sleeping on the wall clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Single clock abstraction. `now()` is used for relative/monotonic
/// measurements (elapsed time, deadlines); `timestamp()` for wall-clock
/// instants attached to messages and log records.
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Monotonic instant, suitable for measuring elapsed durations.
    fn now(&self) -> Instant;

    /// Wall-clock timestamp, suitable for persisted records.
    fn timestamp(&self) -> DateTime<Utc>;

    /// Elapsed duration since `start`.
    fn elapsed(&self, start: Instant) -> Duration {
        self.now().saturating_duration_since(start)
    }

    /// Suspend the caller for `duration`, or return early if `cancellation`
    /// fires first. Returns `true` if the delay elapsed, `false` if
    /// cancelled.
    async fn delay(&self, duration: Duration, cancellation: &CancellationToken) -> bool;
}

/// Default real-clock implementation backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeProvider;

#[async_trait]
impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn timestamp(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn delay(&self, duration: Duration, cancellation: &CancellationToken) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = cancellation.cancelled() => false,
        }
    }
}

/// Type-erased boxed future, used where the trait object form of
/// `TimeProvider::delay` is needed (decorators hold `Arc<dyn TimeProvider>`).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
