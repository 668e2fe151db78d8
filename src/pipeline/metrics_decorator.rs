//! MetricsDecorator (spec.md §4.2.3).

use super::Processor;
use crate::context::{ProcessingContext, ProcessingResult};
use crate::error::ErrorInfo;
use crate::message::Envelope;
use crate::ports::MetricsSink;
use crate::retry_observer::RetryObserver;
use crate::time::TimeProvider;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Counts retries `RetryDecorator` performs internally, so `MetricsDecorator`
/// can record `retry_count` even though it sits outside Retry in the fixed
/// chain and only sees the loop's final result directly. See spec.md §8
/// Scenario 1.
#[derive(Debug, Default)]
struct RetryCounter {
    attempts: AtomicU32,
}

impl RetryObserver for RetryCounter {
    fn on_retry(&self, _attempt: u32, _error: &ErrorInfo) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
    }
}

impl RetryCounter {
    fn count(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

pub struct MetricsDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    inner: Arc<dyn Processor<T, R>>,
    sink: Arc<dyn MetricsSink>,
    time_provider: Arc<dyn TimeProvider>,
    type_name: &'static str,
}

impl<T, R> MetricsDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn new(
        inner: Arc<dyn Processor<T, R>>,
        sink: Arc<dyn MetricsSink>,
        time_provider: Arc<dyn TimeProvider>,
        type_name: &'static str,
    ) -> Self {
        Self {
            inner,
            sink,
            time_provider,
            type_name,
        }
    }
}

#[async_trait]
impl<T, R> Processor<T, R> for MetricsDecorator<T, R>
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
        self.sink.increment_counter(&format!("messages.{}.started", self.type_name), 1);
        let start = self.time_provider.now();

        let retry_counter = Arc::new(RetryCounter::default());
        let context = context.with_retry_observer(retry_counter.clone());

        let result = self.inner.process(envelope, context, cancellation).await;

        let elapsed = self.time_provider.elapsed(start);
        self.sink
            .record_duration(&format!("messages.{}.duration", self.type_name), elapsed);

        if result.success {
            self.sink.increment_counter(&format!("messages.{}.succeeded", self.type_name), 1);
        } else {
            self.sink.increment_counter(&format!("messages.{}.failed", self.type_name), 1);
            if result.exception.is_some() {
                self.sink.increment_counter(&format!("messages.{}.exceptions", self.type_name), 1);
            }
        }

        if retry_counter.count() > 0 {
            self.sink
                .record_value(&format!("messages.{}.retry_count", self.type_name), retry_counter.count() as f64);
        }

        result
    }
}
