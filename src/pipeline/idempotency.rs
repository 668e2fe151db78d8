//! IdempotencyDecorator (spec.md §4.2.6).
//!
//! The fingerprint precedence open question (spec.md §9) is resolved here:
//! `metadata["idempotencyKey"]` wins when present, otherwise the fingerprint
//! is `{type_name}:{message_id}`. The stored response must cross the
//! `IdempotencyStore`'s opaque `Vec<u8>` boundary; since wire/storage codecs
//! are out of scope for the core (spec.md §1) but the cache itself is core
//! behavior, this decorator bounds its own `R: Serialize + DeserializeOwned`
//! and uses `serde_json` to cross that boundary, rather than inventing a
//! second codec abstraction.

use super::Processor;
use crate::context::{ProcessingContext, ProcessingResult};
use crate::message::Envelope;
use crate::ports::IdempotencyStore;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct IdempotencyDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + Serialize + DeserializeOwned + 'static,
{
    inner: Arc<dyn Processor<T, R>>,
    store: Arc<dyn IdempotencyStore>,
    type_name: &'static str,
    ttl: Duration,
    /// At-most-one-concurrent-build-per-fingerprint guarantee (spec.md
    /// §4.2.6). Guards left in the map are never removed; a long-running
    /// process accumulates one entry per distinct fingerprint it has ever
    /// seen, bounded in practice by the idempotency store's own TTL-driven
    /// working set.
    in_flight: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl<T, R> IdempotencyDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + Serialize + DeserializeOwned + 'static,
{
    pub fn new(inner: Arc<dyn Processor<T, R>>, store: Arc<dyn IdempotencyStore>, type_name: &'static str, ttl: Duration) -> Self {
        Self {
            inner,
            store,
            type_name,
            ttl,
            in_flight: DashMap::new(),
        }
    }

    fn fingerprint(&self, envelope: &Envelope<T>, context: &ProcessingContext) -> String {
        if let Some(key) = context.metadata.get("idempotencyKey").and_then(|v| v.as_str()) {
            return key.to_string();
        }
        format!("{}:{}", self.type_name, envelope.message_id)
    }

    fn guard_for(&self, fingerprint: &str) -> Arc<AsyncMutex<()>> {
        self.in_flight.entry(fingerprint.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }
}

#[async_trait]
impl<T, R> Processor<T, R> for IdempotencyDecorator<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + Serialize + DeserializeOwned + 'static,
{
    async fn process(
        &self,
        envelope: &Envelope<T>,
        context: ProcessingContext,
        cancellation: &CancellationToken,
    ) -> ProcessingResult<R> {
        let fingerprint = self.fingerprint(envelope, &context);

        let guard = self.guard_for(&fingerprint);
        let _permit = guard.lock().await;

        match self.store.get(&fingerprint).await {
            Ok(Some(cached)) => {
                if let Ok(response) = serde_json::from_slice::<R>(&cached) {
                    debug!(fingerprint = %fingerprint, "idempotency cache hit");
                    return ProcessingResult::with_response(response);
                }
            }
            Ok(None) => {}
            Err(err) => {
                debug!(fingerprint = %fingerprint, error = %err, "idempotency store lookup failed, proceeding uncached");
            }
        }

        let result = self.inner.process(envelope, context, cancellation).await;

        if result.success {
            if let Some(response) = &result.response {
                if let Ok(bytes) = serde_json::to_vec(response) {
                    if let Err(err) = self.store.put(&fingerprint, bytes, self.ttl).await {
                        debug!(fingerprint = %fingerprint, error = %err, "failed to persist idempotency record");
                    }
                }
            }
        }

        result
    }
}
