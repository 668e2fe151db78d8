//! LoggingDecorator (spec.md §4.2.2).

use super::Processor;
use crate::context::{ProcessingContext, ProcessingResult};
use crate::error::ErrorInfo;
use crate::message::Envelope;
use crate::retry_observer::RetryObserver;
use crate::time::TimeProvider;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Logs a warning for every attempt `RetryDecorator` retries, even though
/// `LoggingDecorator` sits outside Retry in the fixed chain and only ever
/// sees the loop's final result directly. See spec.md §8 Scenario 1.
struct AttemptLogger {
    type_name: &'static str,
    message_id: String,
}

impl std::fmt::Debug for AttemptLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttemptLogger").field("type_name", &self.type_name).finish()
    }
}

impl RetryObserver for AttemptLogger {
    fn on_retry(&self, attempt: u32, error: &ErrorInfo) {
        warn!(
            message_type = self.type_name,
            message_id = %self.message_id,
            attempt,
            error = %error.message,
            "message processing failed, will be retried"
        );
    }
}

pub struct LoggingDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    inner: Arc<dyn Processor<T, R>>,
    time_provider: Arc<dyn TimeProvider>,
    type_name: &'static str,
}

impl<T, R> LoggingDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn new(inner: Arc<dyn Processor<T, R>>, time_provider: Arc<dyn TimeProvider>, type_name: &'static str) -> Self {
        Self {
            inner,
            time_provider,
            type_name,
        }
    }
}

#[async_trait]
impl<T, R> Processor<T, R> for LoggingDecorator<T, R>
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
        let start = self.time_provider.now();
        info!(
            message_type = self.type_name,
            message_id = %envelope.message_id,
            component = %context.component,
            "processing message"
        );

        let observer: Arc<dyn RetryObserver> = Arc::new(AttemptLogger {
            type_name: self.type_name,
            message_id: envelope.message_id.to_string(),
        });
        let context = context.with_retry_observer(observer);

        let result = self.inner.process(envelope, context, cancellation).await;
        let elapsed = self.time_provider.elapsed(start);

        if result.success {
            info!(
                message_type = self.type_name,
                message_id = %envelope.message_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "message processed successfully"
            );
        } else if let Some(err) = &result.exception {
            error!(
                message_type = self.type_name,
                message_id = %envelope.message_id,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %err.message,
                "message processing failed"
            );
        }

        result
    }
}
