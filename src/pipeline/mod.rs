//! Pipeline and Decorator Chain (spec.md §4.2).
//!
//! A decorator holds one inner [`Processor`] and exposes the same
//! `process` contract; composition is by construction order and
//! evaluation is outer-to-inner on entry, inner-to-outer on return. The
//! fixed order mandated by spec.md §2 is:
//!
//! CorrelationContext → Logging → Metrics → Validation → RateLimiting →
//! Batch → Idempotency → CircuitBreaker → Retry → ErrorHandling →
//! Transaction → Handler Invocation
//!
//! [`PipelineBuilder`] assembles that chain from the innermost processor
//! outward.

pub mod batch_decorator;
pub mod circuit_breaker;
pub mod correlation;
pub mod error_handling;
pub mod idempotency;
pub mod log_decorator;
pub mod metrics_decorator;
pub mod rate_limit;
pub mod retry;
pub mod transaction;
pub mod validation;

use crate::context::{ProcessingContext, ProcessingResult};
use crate::message::Envelope;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The contract every decorator and terminal handler invocation
/// implements. `T` is the message payload type, `R` its response type
/// (`()` for events and fire-and-forget commands).
#[async_trait]
pub trait Processor<T, R>: Send + Sync
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    async fn process(
        &self,
        envelope: &Envelope<T>,
        context: ProcessingContext,
        cancellation: &CancellationToken,
    ) -> ProcessingResult<R>;
}

/// Builds a decorator chain around a terminal processor. Each `with_*`
/// call wraps the previously built chain, so calls must be made in
/// outermost-to-innermost declaration order matching spec.md §2; the
/// facade's default builder does this for every registered handler.
pub struct PipelineBuilder<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    inner: Arc<dyn Processor<T, R>>,
}

impl<T, R> PipelineBuilder<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn new(terminal: Arc<dyn Processor<T, R>>) -> Self {
        Self { inner: terminal }
    }

    pub fn wrap(self, f: impl FnOnce(Arc<dyn Processor<T, R>>) -> Arc<dyn Processor<T, R>>) -> Self {
        Self { inner: f(self.inner) }
    }

    pub fn build(self) -> Arc<dyn Processor<T, R>> {
        self.inner
    }
}
