//! CircuitBreakerDecorator Tests (spec.md §8 scenarios 3-4), driven entirely
//! through the public `process`/`state` API rather than the white-box
//! helpers the in-module unit tests use.

use async_trait::async_trait;
use hero_messaging::context::{ProcessingContext, ProcessingResult};
use hero_messaging::error::{ErrorInfo, ErrorKind};
use hero_messaging::message::Envelope;
use hero_messaging::pipeline::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerDecorator, CircuitState};
use hero_messaging::pipeline::Processor;
use hero_messaging::test_support::VirtualTimeProvider;
use hero_messaging::time::TimeProvider;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct SwitchableProcessor {
    succeeding: AtomicBool,
}

impl SwitchableProcessor {
    fn new() -> Self {
        Self { succeeding: AtomicBool::new(false) }
    }

    fn switch_to_succeeding(&self) {
        self.succeeding.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Processor<(), ()> for SwitchableProcessor {
    async fn process(&self, _envelope: &Envelope<()>, _context: ProcessingContext, _cancellation: &CancellationToken) -> ProcessingResult<()> {
        if self.succeeding.load(Ordering::SeqCst) {
            ProcessingResult::successful()
        } else {
            ProcessingResult::failed(ErrorInfo::new(ErrorKind::Transient, "downstream unavailable"), "downstream unavailable")
        }
    }
}

fn config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 5,
        minimum_throughput: 10,
        failure_rate_threshold: 1.1,
        sampling_duration: Duration::from_secs(60),
        break_duration: Duration::from_secs(30),
    }
}

#[tokio::test]
async fn eleventh_call_is_denied_immediately_without_invoking_inner_once_open() {
    let time = Arc::new(VirtualTimeProvider::new());
    let processor = Arc::new(SwitchableProcessor::new());
    let breaker = CircuitBreakerDecorator::<(), ()>::new(processor.clone(), config(), time.clone());
    let cancellation = CancellationToken::new();
    let envelope = Envelope::new((), time.timestamp());

    for _ in 0..10 {
        let _ = breaker.process(&envelope, ProcessingContext::new("test"), &cancellation).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    // Flip the downstream back to healthy: if the breaker still short-circuits
    // we know it never called inner for the 11th attempt.
    processor.switch_to_succeeding();
    let result = breaker.process(&envelope, ProcessingContext::new("test"), &cancellation).await;

    assert!(result.is_failure());
    assert_eq!(result.exception.unwrap().kind, ErrorKind::PolicyDenied);
}

#[tokio::test]
async fn recovers_to_closed_after_three_consecutive_successes_past_break_duration() {
    let time = Arc::new(VirtualTimeProvider::new());
    let processor = Arc::new(SwitchableProcessor::new());
    let breaker = CircuitBreakerDecorator::<(), ()>::new(processor.clone(), config(), time.clone());
    let cancellation = CancellationToken::new();
    let envelope = Envelope::new((), time.timestamp());

    for _ in 0..10 {
        let _ = breaker.process(&envelope, ProcessingContext::new("test"), &cancellation).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    time.advance(Duration::from_secs(30));
    processor.switch_to_succeeding();

    let first = breaker.process(&envelope, ProcessingContext::new("test"), &cancellation).await;
    assert!(first.success, "half-open call should be allowed through to the recovered downstream");
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    let _ = breaker.process(&envelope, ProcessingContext::new("test"), &cancellation).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    let third = breaker.process(&envelope, ProcessingContext::new("test"), &cancellation).await;
    assert!(third.success);
    assert_eq!(breaker.state(), CircuitState::Closed);
}
