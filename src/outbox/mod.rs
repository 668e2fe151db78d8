//! Outbox Processor (spec.md §4.3).
//!
//! Guarantees at-least-once publication of events across crashes by
//! atomically persisting intent inside the business transaction. The
//! entry's payload is opaque (serialization is a named out-of-scope
//! concern, spec.md §1) — the core only shuffles bytes plus a type tag
//! between the store and the transport publisher.

use crate::error::HeroMessagingError;
use crate::ports::{DeadLetterSink, LeaderGate, OutboxStore, TransportPublisher};
use crate::retry_policy::RetryPolicy;
use crate::time::TimeProvider;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Processing,
    Published,
    Failed,
}

#[derive(Debug, Clone)]
pub struct OutboxOptions {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub destination: Option<String>,
}

impl Default for OutboxOptions {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            destination: None,
        }
    }
}

/// A draft passed to [`OutboxStore::add`] before the store assigns an id
/// and timestamps.
#[derive(Debug, Clone)]
pub struct OutboxEntryDraft {
    pub message_type: String,
    pub payload: Vec<u8>,
    pub options: OutboxOptions,
}

#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: String,
    pub message_type: String,
    pub payload: Vec<u8>,
    pub options: OutboxOptions,
    pub status: OutboxStatus,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub error_text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OutboxProcessorConfig {
    pub batch_size: u32,
    pub busy_poll_interval: Duration,
    pub idle_poll_interval: Duration,
    pub retention: Duration,
}

impl Default for OutboxProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            busy_poll_interval: Duration::from_millis(100),
            idle_poll_interval: Duration::from_secs(5),
            retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Background publisher for pending outbox entries. `start` returns a
/// handle whose `stop` cancels the loop and awaits its exit, matching the
/// facade's cancel → await → dispose lifecycle (spec.md §4.6).
pub struct OutboxProcessor {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn TransportPublisher>,
    dead_letter: Option<Arc<dyn DeadLetterSink>>,
    retry_policy: Arc<dyn RetryPolicy>,
    time_provider: Arc<dyn TimeProvider>,
    leader_gate: Arc<dyn LeaderGate>,
    config: OutboxProcessorConfig,
}

pub struct OutboxProcessorHandle {
    cancellation: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

impl OutboxProcessorHandle {
    pub async fn stop(self) {
        self.cancellation.cancel();
        let _ = self.join.await;
    }
}

impl OutboxProcessor {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn TransportPublisher>,
        retry_policy: Arc<dyn RetryPolicy>,
        time_provider: Arc<dyn TimeProvider>,
        config: OutboxProcessorConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            dead_letter: None,
            retry_policy,
            time_provider,
            leader_gate: Arc::new(crate::ports::AlwaysPrimary),
            config,
        }
    }

    pub fn with_dead_letter(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letter = Some(sink);
        self
    }

    pub fn with_leader_gate(mut self, gate: Arc<dyn LeaderGate>) -> Self {
        self.leader_gate = gate;
        self
    }

    /// Spawns the background poll loop. Multiple processors may run
    /// concurrently against the same store; double-claim races are the
    /// store's responsibility to make a no-op (spec.md §4.3 "MUST be
    /// idempotent in the face of claim races").
    pub fn start(self: Arc<Self>) -> OutboxProcessorHandle {
        let cancellation = CancellationToken::new();
        let loop_cancellation = cancellation.clone();
        let processor = self.clone();
        let join = tokio::spawn(async move { processor.run(loop_cancellation).await });
        OutboxProcessorHandle { cancellation, join }
    }

    async fn run(&self, cancellation: CancellationToken) {
        info!(
            batch_size = self.config.batch_size,
            "starting outbox processor"
        );
        loop {
            if cancellation.is_cancelled() {
                break;
            }
            if !self.leader_gate.is_primary() {
                if !self
                    .time_provider
                    .delay(self.config.idle_poll_interval, &cancellation)
                    .await
                {
                    break;
                }
                continue;
            }

            let did_work = match self.poll_once().await {
                Ok(did_work) => did_work,
                Err(err) => {
                    error!(error = %err, "outbox poll failed");
                    false
                }
            };

            let interval = if did_work {
                self.config.busy_poll_interval
            } else {
                self.config.idle_poll_interval
            };
            if !self.time_provider.delay(interval, &cancellation).await {
                break;
            }
        }
        info!("outbox processor stopped");
    }

    /// Claims and publishes one batch. Returns `true` if any entries were
    /// found, driving the adaptive 100ms/5s poll cadence (spec.md §4.3).
    async fn poll_once(&self) -> Result<bool, HeroMessagingError> {
        let entries = self
            .store
            .get_unprocessed(self.config.batch_size)
            .await
            .map_err(HeroMessagingError::Storage)?;

        if entries.is_empty() {
            return Ok(false);
        }

        for entry in entries {
            self.process_entry(entry).await;
        }
        Ok(true)
    }

    async fn process_entry(&self, entry: OutboxEntry) {
        if let Err(err) = self.store.mark_processing(&entry.id).await {
            warn!(entry_id = %entry.id, error = %err, "failed to claim outbox entry, skipping");
            return;
        }

        match self.publisher.publish(&entry).await {
            Ok(()) => {
                if let Err(err) = self.store.mark_published(&entry.id).await {
                    error!(entry_id = %entry.id, error = %err, "failed to mark outbox entry published");
                }
                debug!(entry_id = %entry.id, "outbox entry published");
            }
            Err(err) => self.handle_publish_failure(entry, &err.to_string()).await,
        }
    }

    async fn handle_publish_failure(&self, entry: OutboxEntry, error_text: &str) {
        let attempt = entry.attempt_count + 1;
        if attempt >= entry.options.max_retries {
            warn!(entry_id = %entry.id, attempt, "outbox entry exhausted retries, routing to dead letter");
            if let Err(err) = self.store.mark_failed(&entry.id, error_text, None).await {
                error!(entry_id = %entry.id, error = %err, "failed to mark outbox entry failed");
            }
            if let Some(dead_letter) = &self.dead_letter {
                let mut failed_entry = entry;
                failed_entry.status = OutboxStatus::Failed;
                failed_entry.attempt_count = attempt;
                failed_entry.error_text = Some(error_text.to_string());
                if let Err(err) = dead_letter.send(failed_entry, "retries exhausted").await {
                    error!(error = %err, "dead letter sink rejected outbox entry");
                }
            }
            return;
        }

        let delay = self.retry_policy.delay(attempt, None);
        let next_attempt_at = self.time_provider.timestamp() + chrono::Duration::from_std(delay).unwrap_or_default();
        if let Err(err) = self
            .store
            .mark_failed(&entry.id, error_text, Some(next_attempt_at))
            .await
        {
            error!(entry_id = %entry.id, error = %err, "failed to schedule outbox retry");
        }
    }

    /// Periodic cleanup of terminal entries older than `retention`
    /// (spec.md §4.3 "Cleanup"). Intended to be run from its own scheduled
    /// task by the embedding application, or invoked directly in tests.
    pub async fn cleanup(&self) -> Result<u64, HeroMessagingError> {
        self.store
            .cleanup_old_entries(self.config.retention)
            .await
            .map_err(HeroMessagingError::Storage)
    }
}

/// Wakes the poll loop out of its idle wait immediately, used by
/// `publishToOutbox` callers that want low-latency delivery without
/// waiting for the adaptive backoff to elapse.
#[derive(Debug, Default)]
pub struct FlushSignal(Notify);

impl FlushSignal {
    pub fn new() -> Self {
        Self(Notify::new())
    }

    pub fn notify(&self) {
        self.0.notify_one();
    }

    pub async fn notified(&self) {
        self.0.notified().await;
    }
}
