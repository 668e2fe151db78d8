//! ValidationDecorator (spec.md §4.2.4).

use super::Processor;
use crate::context::{ProcessingContext, ProcessingResult};
use crate::error::{ErrorInfo, ErrorKind};
use crate::message::Envelope;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A single composable validation rule. Returning a non-empty vec short
/// circuits the pipeline with an aggregated failure; the inner processor
/// is never invoked.
pub trait Validator<T>: Send + Sync {
    fn validate(&self, payload: &T) -> Vec<String>;
}

/// Runs a fixed list of validators in order and aggregates every violation,
/// rather than stopping at the first (spec.md: "aggregated error list").
pub struct CompositeValidator<T> {
    validators: Vec<Box<dyn Validator<T>>>,
}

impl<T> CompositeValidator<T> {
    pub fn new(validators: Vec<Box<dyn Validator<T>>>) -> Self {
        Self { validators }
    }
}

impl<T> Validator<T> for CompositeValidator<T> {
    fn validate(&self, payload: &T) -> Vec<String> {
        self.validators.iter().flat_map(|v| v.validate(payload)).collect()
    }
}

pub struct ValidationDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    inner: Arc<dyn Processor<T, R>>,
    validator: Arc<dyn Validator<T>>,
}

impl<T, R> ValidationDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn new(inner: Arc<dyn Processor<T, R>>, validator: Arc<dyn Validator<T>>) -> Self {
        Self { inner, validator }
    }
}

#[async_trait]
impl<T, R> Processor<T, R> for ValidationDecorator<T, R>
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
        let violations = self.validator.validate(&envelope.payload);
        if !violations.is_empty() {
            return ProcessingResult::failed(
                ErrorInfo::new(ErrorKind::Validation, violations.join("; ")),
                "validation failed",
            );
        }
        self.inner.process(envelope, context, cancellation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProcessingContext;
    use crate::test_support::SucceedingProcessor;

    struct NonEmpty;
    impl Validator<String> for NonEmpty {
        fn validate(&self, payload: &String) -> Vec<String> {
            if payload.is_empty() {
                vec!["must not be empty".to_string()]
            } else {
                Vec::new()
            }
        }
    }

    #[tokio::test]
    async fn short_circuits_on_validation_failure() {
        let decorator: ValidationDecorator<String, ()> =
            ValidationDecorator::new(Arc::new(SucceedingProcessor), Arc::new(NonEmpty));
        let envelope = Envelope::new(String::new(), chrono::Utc::now());
        let cancellation = CancellationToken::new();

        let result = decorator.process(&envelope, ProcessingContext::new("test"), &cancellation).await;
        assert!(result.is_failure());
        assert_eq!(result.exception.unwrap().kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn passes_through_on_success() {
        let decorator: ValidationDecorator<String, ()> =
            ValidationDecorator::new(Arc::new(SucceedingProcessor), Arc::new(NonEmpty));
        let envelope = Envelope::new("hello".to_string(), chrono::Utc::now());
        let cancellation = CancellationToken::new();

        let result = decorator.process(&envelope, ProcessingContext::new("test"), &cancellation).await;
        assert!(result.success);
    }
}
