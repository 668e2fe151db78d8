//! BatchDecorator / Batch Accumulator (spec.md §4.2.11, §4.5).
//!
//! The single densest subsystem: a background flush loop coalesces queued
//! items into batches while preserving each caller's exact per-message
//! result. The three test-synchronization signals in [`BatchSignals`]
//! (spec.md §4.5.3) are producer-consumer counters built on
//! `tokio::sync::Semaphore`, not broadcast latches — each emitted permit is
//! consumed by at most one waiter.

use super::Processor;
use crate::context::{ProcessingContext, ProcessingResult};
use crate::error::{ErrorInfo, ErrorKind};
use crate::message::Envelope;
use crate::time::TimeProvider;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub enabled: bool,
    pub max_batch_size: usize,
    pub min_batch_size: usize,
    pub batch_timeout: Duration,
    pub max_degree_of_parallelism: usize,
    pub continue_on_failure: bool,
    pub fallback_to_individual_processing: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_batch_size: 50,
            min_batch_size: 1,
            batch_timeout: Duration::from_millis(200),
            max_degree_of_parallelism: 1,
            continue_on_failure: true,
            fallback_to_individual_processing: true,
        }
    }
}

struct BatchItem<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    envelope: Envelope<T>,
    context: ProcessingContext,
    cancellation: CancellationToken,
    responder: oneshot::Sender<ProcessingResult<R>>,
}

/// The three signals from spec.md §4.5.3. `loop_ready_to_wait` and
/// `iteration_complete` are counting semaphores (each `emit` adds exactly
/// one permit, consumed by exactly one waiter); `loop_initialized` fires
/// once using the standard "check-then-notified" race-free pattern so a
/// constructor awaiting it can never miss the event.
pub struct BatchSignals {
    loop_ready_to_wait: Semaphore,
    iteration_complete: Semaphore,
    initialized: Notify,
    is_initialized: AtomicBool,
}

impl BatchSignals {
    fn new() -> Self {
        Self {
            loop_ready_to_wait: Semaphore::new(0),
            iteration_complete: Semaphore::new(0),
            initialized: Notify::new(),
            is_initialized: AtomicBool::new(false),
        }
    }

    fn emit_ready_to_wait(&self) {
        self.loop_ready_to_wait.add_permits(1);
        if self.is_initialized.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            self.initialized.notify_waiters();
        }
    }

    fn emit_iteration_complete(&self) {
        self.iteration_complete.add_permits(1);
    }

    pub async fn wait_ready_to_wait(&self) {
        let permit = self.loop_ready_to_wait.acquire().await.expect("signal semaphore closed");
        permit.forget();
    }

    pub async fn wait_iteration_complete(&self) {
        let permit = self.iteration_complete.acquire().await.expect("signal semaphore closed");
        permit.forget();
    }

    pub async fn wait_initialized(&self) {
        let notified = self.initialized.notified();
        if self.is_initialized.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

pub struct BatchAccumulator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    inner: Arc<dyn Processor<T, R>>,
    config: BatchConfig,
    time_provider: Arc<dyn TimeProvider>,
    queue: Mutex<VecDeque<BatchItem<T, R>>>,
    queued_count: AtomicUsize,
    flush_trigger: Notify,
    pub signals: Arc<BatchSignals>,
}

pub struct BatchAccumulatorHandle<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    accumulator: Arc<BatchAccumulator<T, R>>,
    cancellation: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

impl<T, R> BatchAccumulatorHandle<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    /// Disposal protocol (spec.md §4.5.4): cancel the background task,
    /// await its exit, then drain and process remaining items individually
    /// so every outstanding future is still honored.
    pub async fn stop(self) {
        self.cancellation.cancel();
        let _ = self.join.await;
        self.accumulator.drain_remaining().await;
    }
}

impl<T, R> BatchAccumulator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn new(inner: Arc<dyn Processor<T, R>>, config: BatchConfig, time_provider: Arc<dyn TimeProvider>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            config,
            time_provider,
            queue: Mutex::new(VecDeque::new()),
            queued_count: AtomicUsize::new(0),
            flush_trigger: Notify::new(),
            signals: Arc::new(BatchSignals::new()),
        })
    }

    /// Spawns the flush loop. The factory is expected to await
    /// `signals.wait_initialized()` before advancing virtual time, per
    /// spec.md §4.5.3.
    pub fn start(self: &Arc<Self>) -> BatchAccumulatorHandle<T, R> {
        let cancellation = CancellationToken::new();
        let loop_cancellation = cancellation.clone();
        let accumulator = self.clone();
        let join = tokio::spawn(async move { accumulator.run(loop_cancellation).await });
        BatchAccumulatorHandle {
            accumulator: self.clone(),
            cancellation,
            join,
        }
    }

    async fn run(self: Arc<Self>, cancellation: CancellationToken) {
        loop {
            self.signals.emit_ready_to_wait();

            tokio::select! {
                _ = self.flush_trigger.notified() => {}
                elapsed = self.time_provider.delay(self.config.batch_timeout, &cancellation) => {
                    if !elapsed {
                        break;
                    }
                }
            }

            self.flush_once().await;
            self.signals.emit_iteration_complete();

            if cancellation.is_cancelled() {
                break;
            }
        }
    }

    /// spec.md §4.5.1. When batching is disabled, callers should invoke
    /// `inner` directly instead of going through the accumulator at all;
    /// this method is only reached when `config.enabled` is true.
    pub async fn enqueue(
        &self,
        envelope: Envelope<T>,
        context: ProcessingContext,
        cancellation: CancellationToken,
    ) -> ProcessingResult<R> {
        let (tx, rx) = oneshot::channel();
        let item = BatchItem {
            envelope,
            context,
            cancellation,
            responder: tx,
        };

        {
            let mut queue = self.queue.lock();
            queue.push_back(item);
        }
        let new_count = self.queued_count.fetch_add(1, Ordering::SeqCst) + 1;
        if new_count >= self.config.max_batch_size {
            self.flush_trigger.notify_one();
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => ProcessingResult::failed(
                ErrorInfo::new(ErrorKind::InfrastructureError, "batch accumulator dropped without a result"),
                "batch accumulator shut down",
            ),
        }
    }

    async fn flush_once(&self) {
        let queued_count = self.queued_count.swap(0, Ordering::SeqCst);
        if queued_count == 0 {
            return;
        }

        let drain_count = queued_count.min(self.config.max_batch_size);
        let items = self.drain(drain_count);
        if items.is_empty() {
            return;
        }

        if items.len() < self.config.min_batch_size {
            self.process_individually(items).await;
        } else {
            self.process_as_batch(items).await;
        }
    }

    fn drain(&self, count: usize) -> Vec<BatchItem<T, R>> {
        let mut queue = self.queue.lock();
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            match queue.pop_front() {
                Some(item) => items.push(item),
                None => break,
            }
        }
        items
    }

    /// Runs `inner` for one item, converting a handler panic into `Err(())`
    /// instead of letting it unwind into the caller (flush loop or batch
    /// worker task). Shared by the sequential batch path and by individual
    /// (non-batch) processing so both honor the same panic-safety contract.
    async fn process_one(&self, item: &BatchItem<T, R>) -> Result<ProcessingResult<R>, ()> {
        let outcome = AssertUnwindSafe(self.inner.process(&item.envelope, item.context.clone(), &item.cancellation))
            .catch_unwind()
            .await;
        match outcome {
            Ok(result) => Ok(result),
            Err(_) => {
                warn!("batch item handler panicked");
                Err(())
            }
        }
    }

    fn panic_failure(message: &str) -> ProcessingResult<R> {
        ProcessingResult::failed(ErrorInfo::new(ErrorKind::Critical, message), message)
    }

    async fn process_individually(&self, items: Vec<BatchItem<T, R>>) {
        for item in items {
            let result = match self.process_one(&item).await {
                Ok(result) => result,
                Err(()) => Self::panic_failure("handler panicked during batch processing"),
            };
            let _ = item.responder.send(result);
        }
    }

    async fn process_as_batch(&self, items: Vec<BatchItem<T, R>>) {
        if self.config.max_degree_of_parallelism <= 1 {
            let mut halted = false;
            let mut items = items.into_iter();
            while let Some(item) = items.next() {
                if halted {
                    let _ = item.responder.send(ProcessingResult::failed(
                        ErrorInfo::new(ErrorKind::HandlerError, "batch processing halted by a prior failure"),
                        "processing halted",
                    ));
                    continue;
                }
                match self.process_one(&item).await {
                    Ok(result) => {
                        if result.is_failure() && !self.config.continue_on_failure {
                            halted = true;
                        }
                        let _ = item.responder.send(result);
                    }
                    Err(()) => {
                        // spec.md §4.5.2 step 6: catastrophic exception. The
                        // item that panicked is completed with the exception
                        // regardless; what happens to the rest of the batch
                        // depends on `fallback_to_individual_processing`.
                        let _ = item.responder.send(Self::panic_failure("handler panicked during batch processing"));
                        let remaining: Vec<BatchItem<T, R>> = items.collect();
                        if self.config.fallback_to_individual_processing {
                            self.process_individually(remaining).await;
                        } else {
                            for remaining_item in remaining {
                                let _ = remaining_item
                                    .responder
                                    .send(Self::panic_failure("batch aborted after handler panic"));
                            }
                        }
                        return;
                    }
                }
            }
            return;
        }

        let permits = Arc::new(Semaphore::new(self.config.max_degree_of_parallelism));
        let mut handles = Vec::with_capacity(items.len());
        for item in items {
            let inner = self.inner.clone();
            let permits = permits.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permits.acquire().await.expect("batch semaphore closed");
                let outcome = AssertUnwindSafe(inner.process(&item.envelope, item.context.clone(), &item.cancellation))
                    .catch_unwind()
                    .await;
                let result = match outcome {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("batch item handler panicked");
                        ProcessingResult::failed(
                            ErrorInfo::new(ErrorKind::Critical, "handler panicked during batch processing"),
                            "handler panicked",
                        )
                    }
                };
                let _ = item.responder.send(result);
            }));
        }

        for handle in handles {
            if handle.await.is_err() {
                debug!("batch worker task did not complete cleanly");
            }
        }
    }

    /// spec.md §4.5.4: drain whatever remains after the loop has stopped
    /// and process it one item at a time so every caller still observes a
    /// result.
    async fn drain_remaining(&self) {
        loop {
            let remaining = self.queued_count.swap(0, Ordering::SeqCst);
            let items = self.drain(remaining.max(self.queue.lock().len()));
            if items.is_empty() {
                break;
            }
            self.process_individually(items).await;
        }
    }
}

/// Pipeline-facing decorator: bypasses the queue entirely when batching is
/// disabled (spec.md §4.5.1), otherwise enqueues and awaits the shared
/// accumulator. Typically constructed once per message type and shared
/// across all calls to that type's pipeline.
pub struct BatchDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    accumulator: Arc<BatchAccumulator<T, R>>,
    inner: Arc<dyn Processor<T, R>>,
    enabled: bool,
}

impl<T, R> BatchDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn new(inner: Arc<dyn Processor<T, R>>, accumulator: Arc<BatchAccumulator<T, R>>, enabled: bool) -> Self {
        Self {
            accumulator,
            inner,
            enabled,
        }
    }
}

#[async_trait]
impl<T, R> Processor<T, R> for BatchDecorator<T, R>
where
    T: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    async fn process(
        &self,
        envelope: &Envelope<T>,
        context: ProcessingContext,
        cancellation: &CancellationToken,
    ) -> ProcessingResult<R> {
        if !self.enabled {
            return self.inner.process(envelope, context, cancellation).await;
        }
        self.accumulator.enqueue(envelope.clone(), context, cancellation.clone()).await
    }
}
