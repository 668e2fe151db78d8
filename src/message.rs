//! Message data model (spec.md §3).
//!
//! A message is one of three shapes — `Command`, `Query<R>`, `Event` — each
//! carried inside an [`Envelope`] that assigns the shared identity and
//! timing fields. `messageId` is assigned once at construction and is
//! stable across retries: the envelope is cloned, never rebuilt, as a
//! message travels through the pipeline.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Opaque metadata value. `Json` covers caller-supplied structured data;
/// the other variants exist so hot-path metadata (correlation ids, retry
/// counts) can be read without a serde round-trip.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    String(String),
    Bool(bool),
    Int(i64),
    Json(serde_json::Value),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::String(s)
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_string())
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

pub type Metadata = HashMap<String, MetadataValue>;

/// Marker trait for command payloads. `Response` is `()` for fire-and-forget
/// commands, or a concrete type for commands that return a value.
pub trait Command: Send + Sync + 'static {
    type Response: Send + Sync + 'static;
}

/// Marker trait for query payloads; unlike commands, a response is mandatory.
pub trait Query: Send + Sync + 'static {
    type Response: Send + Sync + 'static;
}

/// Marker trait for event payloads. Events are cloned once per registered
/// handler, so they must be `Clone`.
pub trait Event: Send + Sync + Clone + 'static {}

/// The envelope shared by every message variant (spec.md §3 "Message").
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub metadata: Metadata,
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Construct a new envelope, assigning a fresh message id and the
    /// current timestamp from `timestamp`. `timestamp` is obtained from a
    /// [`crate::time::TimeProvider`] by the caller — the envelope itself
    /// never reads a clock.
    pub fn new(payload: T, timestamp: DateTime<Utc>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp,
            correlation_id: None,
            causation_id: None,
            metadata: Metadata::new(),
            payload,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_causation_id(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Type name of the payload, used as the dispatch registry's map key
    /// and as the fingerprint prefix for idempotency.
    pub fn type_name() -> &'static str
    where
        T: 'static,
    {
        std::any::type_name::<T>()
    }

    pub fn map<U>(&self, payload: U) -> Envelope<U> {
        Envelope {
            message_id: self.message_id,
            timestamp: self.timestamp,
            correlation_id: self.correlation_id.clone(),
            causation_id: self.causation_id.clone(),
            metadata: self.metadata.clone(),
            payload,
        }
    }
}
