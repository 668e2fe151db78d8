//! RateLimitingDecorator (spec.md §4.2.5).

use super::Processor;
use crate::context::{ProcessingContext, ProcessingResult};
use crate::error::{ErrorInfo, ErrorKind};
use crate::message::Envelope;
use crate::ports::RateLimiter;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct RateLimitingDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    inner: Arc<dyn Processor<T, R>>,
    limiter: Arc<dyn RateLimiter>,
    type_name: &'static str,
}

impl<T, R> RateLimitingDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn new(inner: Arc<dyn Processor<T, R>>, limiter: Arc<dyn RateLimiter>, type_name: &'static str) -> Self {
        Self {
            inner,
            limiter,
            type_name,
        }
    }
}

#[async_trait]
impl<T, R> Processor<T, R> for RateLimitingDecorator<T, R>
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
        let decision = self.limiter.acquire(self.type_name, 1).await;
        if !decision.allowed {
            let mut err = ErrorInfo::new(
                ErrorKind::PolicyDenied,
                decision.reason.clone().unwrap_or_else(|| "rate limit exceeded".to_string()),
            );
            if let Some(retry_after) = decision.retry_after {
                err = err.with_retry_after(retry_after);
            }
            return ProcessingResult::failed(err, "rate limited");
        }
        self.inner.process(envelope, context, cancellation).await
    }
}
