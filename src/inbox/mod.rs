//! Inbox Processor (spec.md §4.4).
//!
//! Deduplicates incoming messages and dispatches them into the in-process
//! pipeline exactly once. Routing back into the pipeline is delegated to a
//! [`crate::ports::MessageRouter`] supplied by the embedding application,
//! since resolving an opaque payload's concrete type is a codec/dispatch
//! concern the core treats as an explicit type-key lookup rather than
//! runtime reflection (Design Notes §9).

use crate::error::HeroMessagingError;
use crate::ports::MessageRouter;
use crate::time::TimeProvider;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxStatus {
    Pending,
    Processing,
    Processed,
    Failed,
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct InboxOptions {
    pub require_idempotency: bool,
    pub deduplication_window: Duration,
}

impl Default for InboxOptions {
    fn default() -> Self {
        Self {
            require_idempotency: true,
            deduplication_window: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InboxEntryDraft {
    pub message_id: String,
    pub message_type: String,
    pub payload: Vec<u8>,
    pub options: InboxOptions,
}

#[derive(Debug, Clone)]
pub struct InboxEntry {
    pub id: String,
    pub message_id: String,
    pub message_type: String,
    pub payload: Vec<u8>,
    pub options: InboxOptions,
    pub status: InboxStatus,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_text: Option<String>,
}

use crate::ports::InboxStore;

#[derive(Debug, Clone)]
pub struct InboxProcessorConfig {
    pub batch_size: u32,
    pub busy_poll_interval: Duration,
    pub idle_poll_interval: Duration,
    pub retention: Duration,
}

impl Default for InboxProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            busy_poll_interval: Duration::from_millis(100),
            idle_poll_interval: Duration::from_secs(5),
            retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// `processIncoming` result (spec.md §4.4): `true` once the message is
/// accepted for processing, `false` if it was a duplicate or the store
/// lost an insertion race.
pub type AcceptDecision = bool;

pub struct InboxProcessor {
    store: Arc<dyn InboxStore>,
    router: Arc<dyn MessageRouter>,
    time_provider: Arc<dyn TimeProvider>,
    config: InboxProcessorConfig,
}

pub struct InboxProcessorHandle {
    cancellation: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

impl InboxProcessorHandle {
    pub async fn stop(self) {
        self.cancellation.cancel();
        let _ = self.join.await;
    }
}

impl InboxProcessor {
    pub fn new(
        store: Arc<dyn InboxStore>,
        router: Arc<dyn MessageRouter>,
        time_provider: Arc<dyn TimeProvider>,
        config: InboxProcessorConfig,
    ) -> Self {
        Self {
            store,
            router,
            time_provider,
            config,
        }
    }

    /// spec.md §4.4 steps 1-3: dedup check, insert, acknowledge.
    pub async fn process_incoming(&self, draft: InboxEntryDraft) -> Result<AcceptDecision, HeroMessagingError> {
        if draft.options.require_idempotency {
            let is_duplicate = self
                .store
                .is_duplicate(&draft.message_id, draft.options.deduplication_window)
                .await
                .map_err(HeroMessagingError::Storage)?;
            if is_duplicate {
                debug!(message_id = %draft.message_id, "inbox: duplicate message suppressed");
                return Ok(false);
            }
        }

        match self.store.add(draft.clone()).await.map_err(HeroMessagingError::Storage)? {
            Some(_entry) => Ok(true),
            None => {
                debug!(message_id = %draft.message_id, "inbox: insertion race, treating as duplicate");
                Ok(false)
            }
        }
    }

    pub fn start(self: Arc<Self>) -> InboxProcessorHandle {
        let cancellation = CancellationToken::new();
        let loop_cancellation = cancellation.clone();
        let processor = self.clone();
        let join = tokio::spawn(async move { processor.run(loop_cancellation).await });
        InboxProcessorHandle { cancellation, join }
    }

    async fn run(&self, cancellation: CancellationToken) {
        info!(batch_size = self.config.batch_size, "starting inbox processor");
        loop {
            if cancellation.is_cancelled() {
                break;
            }
            let did_work = match self.poll_once().await {
                Ok(did_work) => did_work,
                Err(err) => {
                    error!(error = %err, "inbox poll failed");
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
        info!("inbox processor stopped");
    }

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

    async fn process_entry(&self, entry: InboxEntry) {
        if let Err(err) = self.store.mark_processing(&entry.id).await {
            warn!(entry_id = %entry.id, error = %err, "failed to claim inbox entry, skipping");
            return;
        }

        let result = self.router.route(&entry.message_type, &entry.payload).await;
        if result.success {
            if let Err(err) = self.store.mark_processed(&entry.id).await {
                error!(entry_id = %entry.id, error = %err, "failed to mark inbox entry processed");
            }
        } else {
            let error_text = result
                .exception
                .map(|e| e.message)
                .unwrap_or_else(|| "unknown routing failure".to_string());
            if let Err(err) = self.store.mark_failed(&entry.id, &error_text).await {
                error!(entry_id = %entry.id, error = %err, "failed to mark inbox entry failed");
            }
        }
    }

    pub async fn cleanup(&self) -> Result<u64, HeroMessagingError> {
        self.store
            .cleanup_old_entries(self.config.retention)
            .await
            .map_err(HeroMessagingError::Storage)
    }
}
