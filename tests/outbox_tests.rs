//! Outbox Processor Tests (spec.md §8 scenario 7: at-least-once under crash)

use async_trait::async_trait;
use hero_messaging::outbox::{OutboxEntry, OutboxEntryDraft, OutboxOptions, OutboxProcessor, OutboxProcessorConfig, OutboxStatus};
use hero_messaging::ports::{OutboxStore, TransportPublisher};
use hero_messaging::retry_policy::ExponentialBackoffPolicy;
use hero_messaging::test_support::VirtualTimeProvider;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct InMemoryOutboxStore {
    entries: Mutex<HashMap<String, OutboxEntry>>,
    next_id: AtomicU64,
}

impl InMemoryOutboxStore {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn status_of(&self, id: &str) -> OutboxStatus {
        self.entries.lock().get(id).expect("entry must exist").status
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn add(&self, draft: OutboxEntryDraft) -> anyhow::Result<OutboxEntry> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let entry = OutboxEntry {
            id: id.clone(),
            message_type: draft.message_type,
            payload: draft.payload,
            options: draft.options,
            status: OutboxStatus::Pending,
            attempt_count: 0,
            created_at: chrono::Utc::now(),
            last_attempt_at: None,
            next_attempt_at: None,
            error_text: None,
        };
        self.entries.lock().insert(id, entry.clone());
        Ok(entry)
    }

    async fn get_unprocessed(&self, batch_size: u32) -> anyhow::Result<Vec<OutboxEntry>> {
        Ok(self
            .entries
            .lock()
            .values()
            .filter(|e| matches!(e.status, OutboxStatus::Pending | OutboxStatus::Failed))
            .take(batch_size as usize)
            .cloned()
            .collect())
    }

    async fn mark_processing(&self, id: &str) -> anyhow::Result<()> {
        self.entries.lock().get_mut(id).expect("entry must exist").status = OutboxStatus::Processing;
        Ok(())
    }

    async fn mark_published(&self, id: &str) -> anyhow::Result<()> {
        self.entries.lock().get_mut(id).expect("entry must exist").status = OutboxStatus::Published;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &str,
        error_text: &str,
        next_attempt_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> anyhow::Result<()> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(id).expect("entry must exist");
        entry.status = OutboxStatus::Failed;
        entry.attempt_count += 1;
        entry.error_text = Some(error_text.to_string());
        entry.next_attempt_at = next_attempt_at;
        Ok(())
    }

    async fn cleanup_old_entries(&self, _age: Duration) -> anyhow::Result<u64> {
        Ok(0)
    }
}

/// Simulates a transport that "crashes" (fails) the first `fail_times`
/// publish attempts before succeeding, so the outbox must retry to reach
/// at-least-once delivery.
struct CrashingPublisher {
    fail_times: u32,
    attempts: AtomicU32,
}

impl CrashingPublisher {
    fn new(fail_times: u32) -> Self {
        Self {
            fail_times,
            attempts: AtomicU32::new(0),
        }
    }

    fn attempt_count(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportPublisher for CrashingPublisher {
    async fn publish(&self, _entry: &OutboxEntry) -> anyhow::Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_times {
            anyhow::bail!("simulated transport crash");
        }
        Ok(())
    }
}

#[tokio::test]
async fn retries_until_published_despite_transport_crashes() {
    let store = Arc::new(InMemoryOutboxStore::new());
    let publisher = Arc::new(CrashingPublisher::new(2));
    let time = Arc::new(VirtualTimeProvider::new());

    let entry = store
        .add(OutboxEntryDraft {
            message_type: "order.placed".to_string(),
            payload: b"payload".to_vec(),
            options: OutboxOptions {
                max_retries: 5,
                initial_delay: Duration::from_millis(10),
                destination: None,
            },
        })
        .await
        .unwrap();

    let processor = Arc::new(OutboxProcessor::new(
        store.clone(),
        publisher.clone(),
        Arc::new(ExponentialBackoffPolicy::default()),
        time.clone(),
        OutboxProcessorConfig {
            batch_size: 10,
            busy_poll_interval: Duration::from_millis(50),
            idle_poll_interval: Duration::from_millis(50),
            retention: Duration::from_secs(3600),
        },
    ));
    let handle = processor.clone().start();

    for _ in 0..4 {
        tokio::task::yield_now().await;
        time.advance(Duration::from_millis(50));
        tokio::task::yield_now().await;
    }

    handle.stop().await;

    assert_eq!(store.status_of(&entry.id), OutboxStatus::Published);
    assert!(publisher.attempt_count() >= 3, "expected at least 3 publish attempts, got {}", publisher.attempt_count());
}
