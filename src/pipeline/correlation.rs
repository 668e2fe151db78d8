//! CorrelationContextDecorator (spec.md §4.2.1).
//!
//! The original establishes an ambient thread-local scope; per the Design
//! Notes this is re-architected as an explicit derived [`ProcessingContext`]
//! plus a `tracing` span entered only for the duration of the call (a span
//! is a genuinely scoped, RAII-released construct, unlike a thread-local).

use super::Processor;
use crate::context::{ProcessingContext, ProcessingResult};
use crate::message::Envelope;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub struct CorrelationContextDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    inner: Arc<dyn Processor<T, R>>,
}

impl<T, R> CorrelationContextDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn new(inner: Arc<dyn Processor<T, R>>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T, R> Processor<T, R> for CorrelationContextDecorator<T, R>
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
        let correlation_id = envelope
            .correlation_id
            .clone()
            .unwrap_or_else(|| envelope.message_id.to_string());
        let causation_id = envelope.causation_id.clone().unwrap_or_default();
        let message_id = envelope.message_id.to_string();

        let enriched = context
            .with_metadata("correlationId", correlation_id.clone())
            .with_metadata("causationId", causation_id.clone())
            .with_metadata("messageId", message_id.clone());

        let span = tracing::info_span!(
            "message",
            correlation_id = %correlation_id,
            causation_id = %causation_id,
            message_id = %message_id,
        );

        self.inner
            .process(envelope, enriched, cancellation)
            .instrument(span)
            .await
    }
}
