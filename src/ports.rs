//! External interfaces (spec.md §6) — the named ports through which the
//! core reaches collaborators that are explicitly out of scope: concrete
//! storage engines, wire transports, rate limiters, error-handling policy,
//! and telemetry sinks. The core only ever depends on these traits, all of
//! which are dyn-compatible so they can be stored as `Arc<dyn ...>`.

use crate::context::ProcessingResult;
use crate::error::ErrorInfo;
use crate::inbox::{InboxEntry, InboxEntryDraft};
use crate::outbox::{OutboxEntry, OutboxEntryDraft};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Isolation level requested of a unit-of-work. The concrete storage
/// adapter maps this onto whatever its engine supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// A transactional unit of work opened by a storage port's factory.
/// `TransactionDecorator` commits on success, rolls back on failure or
/// thrown error, and releases the scope on every exit path.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait UnitOfWorkFactory: Send + Sync {
    async fn create(&self, isolation: IsolationLevel) -> Result<Box<dyn UnitOfWork>>;
}

/// Storage port backing the outbox processor (spec.md §6 "Storage port").
#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn add(&self, draft: OutboxEntryDraft) -> Result<OutboxEntry>;
    async fn get_unprocessed(&self, batch_size: u32) -> Result<Vec<OutboxEntry>>;
    async fn mark_processing(&self, id: &str) -> Result<()>;
    async fn mark_published(&self, id: &str) -> Result<()>;
    async fn mark_failed(
        &self,
        id: &str,
        error_text: &str,
        next_attempt_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()>;
    async fn cleanup_old_entries(&self, age: Duration) -> Result<u64>;
}

/// Storage port backing the inbox processor. `add` returns `None` when a
/// concurrent insert already claimed the same message id (spec.md §4.4
/// step 2 "if insertion returns null").
#[async_trait]
pub trait InboxStore: Send + Sync {
    async fn add(&self, draft: InboxEntryDraft) -> Result<Option<InboxEntry>>;
    async fn get_unprocessed(&self, batch_size: u32) -> Result<Vec<InboxEntry>>;
    async fn mark_processing(&self, id: &str) -> Result<()>;
    async fn mark_processed(&self, id: &str) -> Result<()>;
    async fn mark_failed(&self, id: &str, error_text: &str) -> Result<()>;
    async fn is_duplicate(&self, message_id: &str, window: Duration) -> Result<bool>;
    async fn cleanup_old_entries(&self, age: Duration) -> Result<u64>;
}

/// Idempotency cache port used by `IdempotencyDecorator`. The stored
/// `response` is an opaque serialized payload — the core never interprets
/// it, only replays it.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(&self, fingerprint: &str) -> Result<Option<Vec<u8>>>;
    async fn put(&self, fingerprint: &str, response: Vec<u8>, ttl: Duration) -> Result<()>;
}

/// Transport publisher port consumed by the outbox flush loop.
#[async_trait]
pub trait TransportPublisher: Send + Sync {
    async fn publish(&self, entry: &OutboxEntry) -> Result<()>;
}

/// Sink for outbox entries exhausted past their retry budget (§11 of
/// SPEC_FULL.md).
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn send(&self, entry: OutboxEntry, reason: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub retry_after: Option<Duration>,
    pub reason: Option<String>,
}

/// Rate-limiter port keyed by message-type name (spec.md §6).
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn acquire(&self, key: &str, permits: u32) -> RateLimitDecision;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    Retry,
    SendToDeadLetter,
    Discard,
    Escalate,
}

#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub retry_count: u32,
    pub max_retries: u32,
    pub component: String,
    pub first_failure_time: Option<chrono::DateTime<chrono::Utc>>,
    pub last_failure_time: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct ErrorDecision {
    pub action: ErrorAction,
    pub retry_delay: Option<Duration>,
    pub reason: Option<String>,
}

/// Terminal error policy port consumed by `ErrorHandlingDecorator`.
#[async_trait]
pub trait ErrorHandlerPort: Send + Sync {
    async fn handle(&self, message_id: &str, error: &ErrorInfo, context: &ErrorContext) -> ErrorDecision;
}

/// Telemetry sink port (spec.md §6 "Metrics sink port"). Push-based;
/// deliberately synchronous since recording a metric must never suspend
/// the caller.
pub trait MetricsSink: Send + Sync {
    fn increment_counter(&self, name: &str, delta: u64);
    fn record_duration(&self, name: &str, duration: Duration);
    fn record_value(&self, name: &str, value: f64);
}

/// No-op sink, used as the default when the embedding application does
/// not wire in a real telemetry backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn increment_counter(&self, _name: &str, _delta: u64) {}
    fn record_duration(&self, _name: &str, _duration: Duration) {}
    fn record_value(&self, _name: &str, _value: f64) {}
}

/// Gates a background loop on leadership in multi-instance deployments
/// (§11 of SPEC_FULL.md). The core only consumes this signal; it does not
/// implement leader election.
pub trait LeaderGate: Send + Sync {
    fn is_primary(&self) -> bool;
}

/// Default gate for single-instance deployments: always primary.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysPrimary;

impl LeaderGate for AlwaysPrimary {
    fn is_primary(&self) -> bool {
        true
    }
}

/// Routes an opaque inbox payload back into the in-process pipeline by its
/// type tag. The embedding application implements this once per
/// deployment, typically as a match over the registered message type
/// names that deserializes and calls the facade's `send`/`publish`
/// (Design Notes §9: explicit type-key dispatch rather than reflection).
#[async_trait]
pub trait MessageRouter: Send + Sync {
    async fn route(&self, message_type: &str, payload: &[u8]) -> ProcessingResult<()>;
}
