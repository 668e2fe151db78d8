//! Retry Decorator Tests (spec.md §8 scenarios 1-2)

use async_trait::async_trait;
use hero_messaging::context::{ProcessingContext, ProcessingResult};
use hero_messaging::error::{ErrorInfo, ErrorKind};
use hero_messaging::message::Envelope;
use hero_messaging::pipeline::retry::RetryDecorator;
use hero_messaging::pipeline::Processor;
use hero_messaging::random::FixedRandomSource;
use hero_messaging::retry_policy::{ExponentialBackoffConfig, ExponentialBackoffPolicy};
use hero_messaging::test_support::{FlakyProcessor, VirtualTimeProvider};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct AlwaysCriticalProcessor {
    invocations: std::sync::atomic::AtomicU32,
}

impl AlwaysCriticalProcessor {
    fn new() -> Self {
        Self {
            invocations: std::sync::atomic::AtomicU32::new(0),
        }
    }

    fn invocation_count(&self) -> u32 {
        self.invocations.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl Processor<(), ()> for AlwaysCriticalProcessor {
    async fn process(&self, _envelope: &Envelope<()>, _context: ProcessingContext, _cancellation: &CancellationToken) -> ProcessingResult<()> {
        self.invocations.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        ProcessingResult::failed(ErrorInfo::new(ErrorKind::Critical, "out of memory"), "out of memory")
    }
}

fn zero_delay_policy() -> Arc<ExponentialBackoffPolicy> {
    Arc::new(
        ExponentialBackoffPolicy::new(ExponentialBackoffConfig {
            base_delay: std::time::Duration::ZERO,
            max_delay: std::time::Duration::from_secs(30),
            jitter_factor: 0.0,
        })
        .with_random_source(Arc::new(FixedRandomSource(0.0))),
    )
}

#[tokio::test]
async fn retry_succeeds_on_third_attempt() {
    let flaky = Arc::new(FlakyProcessor::new(2));
    let time = Arc::new(VirtualTimeProvider::new());
    let decorator: RetryDecorator<(), ()> = RetryDecorator::new(flaky.clone(), zero_delay_policy(), time, 3);

    let envelope = Envelope::new((), chrono::Utc::now());
    let cancellation = CancellationToken::new();
    let result = decorator.process(&envelope, ProcessingContext::new("test"), &cancellation).await;

    assert!(result.success);
    assert_eq!(flaky.invocation_count(), 3);
}

#[tokio::test]
async fn critical_exception_is_not_retried() {
    let processor = Arc::new(AlwaysCriticalProcessor::new());
    let time = Arc::new(VirtualTimeProvider::new());
    let decorator: RetryDecorator<(), ()> = RetryDecorator::new(processor.clone(), zero_delay_policy(), time, 5);

    let envelope = Envelope::new((), chrono::Utc::now());
    let cancellation = CancellationToken::new();
    let result = decorator.process(&envelope, ProcessingContext::new("test"), &cancellation).await;

    assert!(result.is_failure());
    assert_eq!(processor.invocation_count(), 1);
}
