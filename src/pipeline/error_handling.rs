//! ErrorHandlingDecorator (spec.md §4.2.9).

use super::Processor;
use crate::context::{ProcessingContext, ProcessingResult};
use crate::error::ErrorInfo;
use crate::message::Envelope;
use crate::ports::{ErrorAction, ErrorContext, ErrorHandlerPort};
use crate::time::TimeProvider;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct ErrorHandlingDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    inner: Arc<dyn Processor<T, R>>,
    handler: Arc<dyn ErrorHandlerPort>,
    time_provider: Arc<dyn TimeProvider>,
    max_retries: u32,
}

impl<T, R> ErrorHandlingDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn new(inner: Arc<dyn Processor<T, R>>, handler: Arc<dyn ErrorHandlerPort>, time_provider: Arc<dyn TimeProvider>, max_retries: u32) -> Self {
        Self {
            inner,
            handler,
            time_provider,
            max_retries,
        }
    }

    fn tag_failure(mut err: ErrorInfo, tag: &str) -> ErrorInfo {
        err.message = format!("[{}] {}", tag, err.message);
        err
    }
}

#[async_trait]
impl<T, R> Processor<T, R> for ErrorHandlingDecorator<T, R>
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

        loop {
            let result = self.inner.process(envelope, current_context.clone(), cancellation).await;
            if result.success {
                return result;
            }

            let err = match &result.exception {
                Some(err) => err.clone(),
                None => return result,
            };

            let first_failure_time = current_context.first_failure_time.unwrap_or_else(|| self.time_provider.timestamp());
            let error_context = ErrorContext {
                retry_count: current_context.retry_count,
                max_retries: self.max_retries,
                component: current_context.component.clone(),
                first_failure_time: Some(first_failure_time),
                last_failure_time: self.time_provider.timestamp(),
            };

            let decision = self.handler.handle(&envelope.message_id.to_string(), &err, &error_context).await;
            match decision.action {
                ErrorAction::Retry => {
                    if current_context.retry_count >= self.max_retries {
                        return ProcessingResult::failed(err, "max retries exhausted");
                    }
                    if let Some(delay) = decision.retry_delay {
                        if !self.time_provider.delay(delay, cancellation).await {
                            return ProcessingResult::failed(err, "cancelled during error-handling retry delay");
                        }
                    }
                    current_context = current_context.with_retry(current_context.retry_count + 1, first_failure_time);
                    info!(component = %current_context.component, "error handler requested retry");
                }
                ErrorAction::SendToDeadLetter => {
                    warn!(component = %current_context.component, "error handler routed message to dead letter");
                    return ProcessingResult::failed(Self::tag_failure(err, "dead-letter"), "sent to dead letter");
                }
                ErrorAction::Discard => {
                    warn!(component = %current_context.component, "error handler discarded message");
                    return ProcessingResult::failed(Self::tag_failure(err, "discarded"), "discarded");
                }
                ErrorAction::Escalate => {
                    return ProcessingResult::failed(Self::tag_failure(err, "escalated"), "escalated");
                }
            }
        }
    }
}
