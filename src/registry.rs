//! Dispatch Registry (spec.md §4.1).
//!
//! Type-keyed map from message type to its single command/query handler,
//! or list of event handlers. Registration happens once at startup; the
//! map is read-only for the remainder of the process's life, so lookups
//! use a lock-free `DashMap` rather than a mutex-guarded `HashMap`.

use crate::context::ProcessingResult;
use crate::error::{ErrorInfo, ErrorKind, HeroMessagingError};
use crate::message::{Command, Event, Query};
use async_trait::async_trait;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync {
    async fn handle(&self, command: &C) -> Result<C::Response, HeroMessagingError>;
}

#[async_trait]
pub trait QueryHandler<Q: Query>: Send + Sync {
    async fn handle(&self, query: &Q) -> Result<Q::Response, HeroMessagingError>;
}

#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync {
    async fn handle(&self, event: &E) -> Result<(), HeroMessagingError>;
}

/// Fixed-capacity ring buffer of the last `CAPACITY` processing durations,
/// written via a monotonic atomic index (spec.md §4.1). Reads are
/// best-effort snapshots, not linearizable with writes — acceptable for an
/// average-latency diagnostic.
const DURATION_WINDOW_CAPACITY: usize = 100;

struct DurationWindow {
    samples_nanos: Vec<AtomicU64>,
    write_index: AtomicUsize,
    filled: AtomicUsize,
}

impl DurationWindow {
    fn new() -> Self {
        let mut samples_nanos = Vec::with_capacity(DURATION_WINDOW_CAPACITY);
        samples_nanos.resize_with(DURATION_WINDOW_CAPACITY, || AtomicU64::new(0));
        Self {
            samples_nanos,
            write_index: AtomicUsize::new(0),
            filled: AtomicUsize::new(0),
        }
    }

    fn record(&self, duration: Duration) {
        let idx = self.write_index.fetch_add(1, Ordering::Relaxed) % DURATION_WINDOW_CAPACITY;
        self.samples_nanos[idx].store(duration.as_nanos() as u64, Ordering::Relaxed);
        let filled = self.filled.load(Ordering::Relaxed);
        if filled < DURATION_WINDOW_CAPACITY {
            self.filled.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn average(&self) -> Duration {
        let filled = self.filled.load(Ordering::Relaxed).min(DURATION_WINDOW_CAPACITY);
        if filled == 0 {
            return Duration::ZERO;
        }
        let sum: u64 = self.samples_nanos[..filled]
            .iter()
            .map(|a| a.load(Ordering::Relaxed))
            .sum();
        Duration::from_nanos(sum / filled as u64)
    }
}

/// Per-message-type counters (spec.md §4.1: processedCount, failedCount,
/// rolling average latency).
pub struct TypeStats {
    processed_count: AtomicU64,
    failed_count: AtomicU64,
    durations: DurationWindow,
}

impl TypeStats {
    fn new() -> Self {
        Self {
            processed_count: AtomicU64::new(0),
            failed_count: AtomicU64::new(0),
            durations: DurationWindow::new(),
        }
    }

    fn record_success(&self, elapsed: Duration) {
        self.processed_count.fetch_add(1, Ordering::Relaxed);
        self.durations.record(elapsed);
    }

    fn record_failure(&self, elapsed: Duration) {
        self.failed_count.fetch_add(1, Ordering::Relaxed);
        self.durations.record(elapsed);
    }

    pub fn processed_count(&self) -> u64 {
        self.processed_count.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed_count.load(Ordering::Relaxed)
    }

    pub fn average_duration(&self) -> Duration {
        self.durations.average()
    }
}

/// Type-keyed dispatch map. Command/query slots hold at most one handler;
/// event slots hold an ordered list invoked in registration order.
pub struct Registry {
    commands: DashMap<TypeId, Box<dyn Any + Send + Sync>>,
    queries: DashMap<TypeId, Box<dyn Any + Send + Sync>>,
    events: DashMap<TypeId, Vec<Box<dyn Any + Send + Sync>>>,
    stats: DashMap<TypeId, Arc<TypeStats>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            commands: DashMap::new(),
            queries: DashMap::new(),
            events: DashMap::new(),
            stats: DashMap::new(),
        }
    }

    fn stats_for(&self, type_id: TypeId) -> Arc<TypeStats> {
        self.stats
            .entry(type_id)
            .or_insert_with(|| Arc::new(TypeStats::new()))
            .clone()
    }

    pub fn stats_for_type<T: 'static>(&self) -> Option<Arc<TypeStats>> {
        self.stats.get(&TypeId::of::<T>()).map(|s| s.clone())
    }

    /// One-time setup step: overwrites any previously registered handler
    /// for `C`.
    pub fn register_command<C: Command>(&self, handler: impl CommandHandler<C> + 'static) {
        let boxed: Arc<dyn CommandHandler<C>> = Arc::new(handler);
        self.commands.insert(TypeId::of::<C>(), Box::new(boxed));
    }

    pub fn register_query<Q: Query>(&self, handler: impl QueryHandler<Q> + 'static) {
        let boxed: Arc<dyn QueryHandler<Q>> = Arc::new(handler);
        self.queries.insert(TypeId::of::<Q>(), Box::new(boxed));
    }

    /// Appends to the event handler list; invocation order follows
    /// registration order.
    pub fn register_event<E: Event>(&self, handler: impl EventHandler<E> + 'static) {
        let boxed: Arc<dyn EventHandler<E>> = Arc::new(handler);
        self.events
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Box::new(boxed));
    }

    /// Invokes the single registered command handler, recording the type's
    /// counters and duration window around the call. Fails with
    /// `HeroMessagingError::NoHandler` if none is registered.
    pub async fn send_command<C: Command>(
        &self,
        command: &C,
        elapsed_since: impl Fn() -> Duration,
    ) -> Result<C::Response, HeroMessagingError> {
        let type_id = TypeId::of::<C>();
        let handler = {
            let entry = self
                .commands
                .get(&type_id)
                .ok_or_else(|| HeroMessagingError::NoHandler(std::any::type_name::<C>().to_string()))?;
            entry
                .downcast_ref::<Arc<dyn CommandHandler<C>>>()
                .expect("command handler type mismatch")
                .clone()
        };
        let stats = self.stats_for(type_id);
        let result = handler.handle(command).await;
        match &result {
            Ok(_) => stats.record_success(elapsed_since()),
            Err(_) => stats.record_failure(elapsed_since()),
        }
        result
    }

    pub async fn send_query<Q: Query>(
        &self,
        query: &Q,
        elapsed_since: impl Fn() -> Duration,
    ) -> Result<Q::Response, HeroMessagingError> {
        let type_id = TypeId::of::<Q>();
        let handler = {
            let entry = self
                .queries
                .get(&type_id)
                .ok_or_else(|| HeroMessagingError::NoHandler(std::any::type_name::<Q>().to_string()))?;
            entry
                .downcast_ref::<Arc<dyn QueryHandler<Q>>>()
                .expect("query handler type mismatch")
                .clone()
        };
        let stats = self.stats_for(type_id);
        let result = handler.handle(query).await;
        match &result {
            Ok(_) => stats.record_success(elapsed_since()),
            Err(_) => stats.record_failure(elapsed_since()),
        }
        result
    }

    /// Invokes every registered handler for `E` in registration order.
    /// Failures of one handler do not prevent the rest from running; all
    /// errors are aggregated into a single failed [`ProcessingResult`].
    pub async fn publish_event<E: Event>(
        &self,
        event: &E,
        elapsed_since: impl Fn() -> Duration,
    ) -> ProcessingResult<()> {
        let type_id = TypeId::of::<E>();
        let stats = self.stats_for(type_id);
        let handlers: Vec<Arc<dyn EventHandler<E>>> = match self.events.get(&type_id) {
            Some(list) => list
                .iter()
                .map(|boxed| {
                    boxed
                        .downcast_ref::<Arc<dyn EventHandler<E>>>()
                        .expect("event handler type mismatch")
                        .clone()
                })
                .collect(),
            None => Vec::new(),
        };

        let mut errors = Vec::new();
        for handler in &handlers {
            if let Err(err) = handler.handle(event).await {
                errors.push(err.to_string());
            }
        }

        if errors.is_empty() {
            stats.record_success(elapsed_since());
            ProcessingResult::successful()
        } else {
            stats.record_failure(elapsed_since());
            ProcessingResult::failed(
                ErrorInfo::new(ErrorKind::HandlerError, errors.join("; ")),
                format!("{} of {} event handlers failed", errors.len(), handlers.len()),
            )
        }
    }
}
