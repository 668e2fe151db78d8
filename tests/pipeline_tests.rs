//! End-to-end decorator chain composition (spec.md §2, §4.2): builds a
//! realistic subset of the fixed order — Correlation → Logging →
//! RateLimiting → CircuitBreaker → Retry → terminal handler — via
//! `PipelineBuilder` and exercises it as a caller would, through
//! `Processor::process` alone.

use async_trait::async_trait;
use hero_messaging::context::{ProcessingContext, ProcessingResult};
use hero_messaging::message::Envelope;
use hero_messaging::pipeline::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerDecorator};
use hero_messaging::pipeline::correlation::CorrelationContextDecorator;
use hero_messaging::pipeline::log_decorator::LoggingDecorator;
use hero_messaging::pipeline::metrics_decorator::MetricsDecorator;
use hero_messaging::pipeline::rate_limit::RateLimitingDecorator;
use hero_messaging::pipeline::retry::RetryDecorator;
use hero_messaging::pipeline::{PipelineBuilder, Processor};
use hero_messaging::ports::{RateLimitDecision, RateLimiter};
use hero_messaging::random::FixedRandomSource;
use hero_messaging::retry_policy::{ExponentialBackoffConfig, ExponentialBackoffPolicy};
use hero_messaging::test_support::{FlakyProcessor, RecordingMetricsSink, VirtualTimeProvider};
use hero_messaging::time::TimeProvider;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

struct AlwaysAllow;

#[async_trait]
impl RateLimiter for AlwaysAllow {
    async fn acquire(&self, _key: &str, _permits: u32) -> RateLimitDecision {
        RateLimitDecision { allowed: true, remaining: u32::MAX, retry_after: None, reason: None }
    }
}

struct AlwaysDeny;

#[async_trait]
impl RateLimiter for AlwaysDeny {
    async fn acquire(&self, _key: &str, _permits: u32) -> RateLimitDecision {
        RateLimitDecision {
            allowed: false,
            remaining: 0,
            retry_after: Some(std::time::Duration::from_secs(1)),
            reason: Some("quota exhausted".to_string()),
        }
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
async fn full_chain_recovers_from_transient_failure_through_retry() {
    let time = Arc::new(VirtualTimeProvider::new());
    let flaky = Arc::new(FlakyProcessor::new(1));

    let pipeline = PipelineBuilder::<(), ()>::new(flaky.clone())
        .wrap(|inner| Arc::new(RetryDecorator::new(inner, zero_delay_policy(), time.clone(), 3)))
        .wrap(|inner| Arc::new(CircuitBreakerDecorator::new(inner, CircuitBreakerConfig::default(), time.clone())))
        .wrap(|inner| Arc::new(RateLimitingDecorator::new(inner, Arc::new(AlwaysAllow), "test.command")))
        .wrap(|inner| Arc::new(LoggingDecorator::new(inner, time.clone(), "test.command")))
        .wrap(|inner| Arc::new(CorrelationContextDecorator::new(inner)))
        .build();

    let envelope = Envelope::new((), time.timestamp());
    let cancellation = CancellationToken::new();
    let result = pipeline.process(&envelope, ProcessingContext::new("test"), &cancellation).await;

    assert!(result.success);
    assert_eq!(flaky.invocation_count(), 2, "retry decorator should have re-invoked the flaky handler once");
}

/// In-memory `tracing` writer so a test can inspect exactly what got logged.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;
    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    fn occurrences(&self, needle: &str) -> usize {
        self.text().matches(needle).count()
    }
}

/// spec.md §8 Scenario 1: handler fails twice then succeeds with
/// `maxRetries=3` ⇒ result success, 3 handler invocations, two warning logs,
/// one success log, and `retryCount=2` observed by metrics. Logging and
/// Metrics sit outside Retry in the fixed chain order, so this exercises the
/// retry-observer side channel rather than reading it off the final result.
#[tokio::test]
async fn retry_scenario_reports_two_warnings_and_retry_count_two() {
    let time = Arc::new(VirtualTimeProvider::new());
    let flaky = Arc::new(FlakyProcessor::new(2));
    let metrics = Arc::new(RecordingMetricsSink::new());
    let logs = CapturedLogs::default();

    let subscriber = tracing_subscriber::fmt().with_writer(logs.clone()).with_ansi(false).finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let pipeline = PipelineBuilder::<(), ()>::new(flaky.clone())
        .wrap(|inner| Arc::new(RetryDecorator::new(inner, zero_delay_policy(), time.clone(), 3)))
        .wrap(|inner| Arc::new(MetricsDecorator::new(inner, metrics.clone(), time.clone(), "test.command")))
        .wrap(|inner| Arc::new(LoggingDecorator::new(inner, time.clone(), "test.command")))
        .build();

    let envelope = Envelope::new((), time.timestamp());
    let cancellation = CancellationToken::new();
    let result = pipeline.process(&envelope, ProcessingContext::new("test"), &cancellation).await;

    assert!(result.success);
    assert_eq!(flaky.invocation_count(), 3, "handler should run once, then twice more on retry");
    assert_eq!(
        logs.occurrences("message processing failed, will be retried"),
        2,
        "each of the two failed attempts must be logged as a warning by the decorator outside Retry"
    );
    assert_eq!(logs.occurrences("message processed successfully"), 1);
    assert_eq!(metrics.values_named("messages.test.command.retry_count"), vec![2.0]);
}

#[tokio::test]
async fn rate_limit_denial_short_circuits_before_the_handler_runs() {
    let time = Arc::new(VirtualTimeProvider::new());
    let reached_handler = Arc::new(AtomicBool::new(false));

    struct FlagProcessor(Arc<AtomicBool>);
    #[async_trait]
    impl Processor<(), ()> for FlagProcessor {
        async fn process(&self, _e: &Envelope<()>, _c: ProcessingContext, _cancel: &CancellationToken) -> ProcessingResult<()> {
            self.0.store(true, Ordering::SeqCst);
            ProcessingResult::successful()
        }
    }

    let pipeline = PipelineBuilder::<(), ()>::new(Arc::new(FlagProcessor(reached_handler.clone())))
        .wrap(|inner| Arc::new(RateLimitingDecorator::new(inner, Arc::new(AlwaysDeny), "test.command")))
        .wrap(|inner| Arc::new(CorrelationContextDecorator::new(inner)))
        .build();

    let envelope = Envelope::new((), time.timestamp());
    let cancellation = CancellationToken::new();
    let result = pipeline.process(&envelope, ProcessingContext::new("test"), &cancellation).await;

    assert!(result.is_failure());
    assert!(!reached_handler.load(Ordering::SeqCst), "handler must not run once the rate limiter denies the request");
}
