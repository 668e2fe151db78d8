//! RetryObserver (spec.md §8 Scenario 1): lets decorators positioned
//! outside `RetryDecorator` in the fixed pipeline order (spec.md §2) see
//! each retry it performs internally. Logging and Metrics wrap the entire
//! retry loop and would otherwise only ever observe the loop's final,
//! aggregated `ProcessingResult` — never the individual attempts that
//! preceded it. Threaded through [`crate::context::ProcessingContext`]
//! rather than returned out of `RetryDecorator::process`, so the spec's
//! decorator ordering does not have to change for outer decorators to stay
//! retry-aware.

use crate::error::ErrorInfo;
use std::sync::Arc;

pub trait RetryObserver: Send + Sync + std::fmt::Debug {
    /// Called once for every attempt that failed and is about to be
    /// retried. Not called for the terminal attempt (success, or a failure
    /// that exhausts retries or is non-retryable) — the decorator that
    /// installed the observer already sees that outcome directly as
    /// `RetryDecorator::process`'s return value. `attempt` is the
    /// zero-indexed number of the attempt that just failed.
    fn on_retry(&self, attempt: u32, error: &ErrorInfo);
}

/// Fans a single `on_retry` call out to every observer an outer decorator
/// chain has installed, so e.g. Logging and Metrics can each attach their
/// own observer without one clobbering the other's.
#[derive(Debug)]
struct CompositeRetryObserver(Arc<dyn RetryObserver>, Arc<dyn RetryObserver>);

impl RetryObserver for CompositeRetryObserver {
    fn on_retry(&self, attempt: u32, error: &ErrorInfo) {
        self.0.on_retry(attempt, error);
        self.1.on_retry(attempt, error);
    }
}

/// Combines `existing` (if any) with `observer` so both get notified.
pub(crate) fn chain(existing: Option<Arc<dyn RetryObserver>>, observer: Arc<dyn RetryObserver>) -> Arc<dyn RetryObserver> {
    match existing {
        Some(existing) => Arc::new(CompositeRetryObserver(existing, observer)),
        None => observer,
    }
}
