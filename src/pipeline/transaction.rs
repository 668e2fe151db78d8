//! TransactionDecorator (spec.md §4.2.10).
//!
//! Opens a unit of work, invokes inner, commits on success, rolls back on
//! any failure result, and releases the scope on every exit path. The
//! query variant (`commit_on_read`) still commits on success to release
//! locks consistently, per spec.md's "query variant commits even for read
//! operations."

use super::Processor;
use crate::context::{ProcessingContext, ProcessingResult};
use crate::error::{ErrorInfo, ErrorKind};
use crate::message::Envelope;
use crate::ports::{IsolationLevel, UnitOfWorkFactory};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::error;

pub struct TransactionDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    inner: Arc<dyn Processor<T, R>>,
    factory: Arc<dyn UnitOfWorkFactory>,
    isolation: IsolationLevel,
}

impl<T, R> TransactionDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn new(inner: Arc<dyn Processor<T, R>>, factory: Arc<dyn UnitOfWorkFactory>, isolation: IsolationLevel) -> Self {
        Self { inner, factory, isolation }
    }
}

#[async_trait]
impl<T, R> Processor<T, R> for TransactionDecorator<T, R>
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
        let uow = match self.factory.create(self.isolation).await {
            Ok(uow) => uow,
            Err(err) => {
                return ProcessingResult::failed(
                    ErrorInfo::new(ErrorKind::InfrastructureError, err.to_string()),
                    "failed to open unit of work",
                );
            }
        };

        let result = self.inner.process(envelope, context, cancellation).await;

        if result.success {
            if let Err(err) = uow.commit().await {
                error!(error = %err, "failed to commit unit of work");
                return ProcessingResult::failed(
                    ErrorInfo::new(ErrorKind::InfrastructureError, err.to_string()),
                    "commit failed",
                );
            }
        } else if let Err(err) = uow.rollback().await {
            error!(error = %err, "failed to roll back unit of work");
        }

        result
    }
}
