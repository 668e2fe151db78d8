//! RetryDecorator (spec.md §4.2.8).

use super::Processor;
use crate::context::{ProcessingContext, ProcessingResult};
use crate::message::Envelope;
use crate::retry_policy::RetryPolicy;
use crate::time::TimeProvider;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct RetryDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    inner: Arc<dyn Processor<T, R>>,
    policy: Arc<dyn RetryPolicy>,
    time_provider: Arc<dyn TimeProvider>,
    max_retries: u32,
}

impl<T, R> RetryDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn new(
        inner: Arc<dyn Processor<T, R>>,
        policy: Arc<dyn RetryPolicy>,
        time_provider: Arc<dyn TimeProvider>,
        max_retries: u32,
    ) -> Self {
        Self {
            inner,
            policy,
            time_provider,
            max_retries,
        }
    }
}

#[async_trait]
impl<T, R> Processor<T, R> for RetryDecorator<T, R>
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
        let mut current_context = context;
        let mut attempt = 0u32;

        loop {
            if cancellation.is_cancelled() {
                return ProcessingResult::failed(
                    crate::error::ErrorInfo::new(crate::error::ErrorKind::Transient, "cancelled before retry attempt"),
                    "cancelled",
                );
            }

            let result = self.inner.process(envelope, current_context.clone(), cancellation).await;
            if result.success {
                return result;
            }

            let should_retry = self
                .policy
                .should_retry(attempt, self.max_retries, result.exception.as_ref());
            if !should_retry {
                return result;
            }

            if let (Some(observer), Some(err)) = (current_context.retry_observer.as_ref(), result.exception.as_ref()) {
                observer.on_retry(attempt, err);
            }

            attempt += 1;
            let delay = self.policy.delay(attempt, result.exception.as_ref());
            debug!(
                message_id = %envelope.message_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying after failure"
            );

            let first_failure_time = current_context.first_failure_time.unwrap_or_else(|| self.time_provider.timestamp());
            current_context = current_context.with_retry(attempt, first_failure_time);

            if !self.time_provider.delay(delay, cancellation).await {
                return ProcessingResult::failed(
                    crate::error::ErrorInfo::new(crate::error::ErrorKind::Transient, "cancelled during retry delay"),
                    "cancelled",
                );
            }
        }
    }
}
