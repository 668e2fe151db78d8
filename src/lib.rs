//! HeroMessaging core: an in-process messaging framework that routes
//! commands, queries, and events through a decorator pipeline with
//! reliability patterns (retry, circuit breaker, idempotency, rate
//! limiting, transactional outbox/inbox) and batching.
//!
//! This crate is the CORE only. Concrete storage engines, wire transports,
//! serialization codecs, and telemetry backends are reached exclusively
//! through the port traits in [`ports`]; the embedding application wires in
//! real implementations.

pub mod context;
pub mod error;
pub mod facade;
pub mod inbox;
pub mod logging;
pub mod message;
pub mod outbox;
pub mod pipeline;
pub mod ports;
pub mod random;
pub mod registry;
pub mod retry_observer;
pub mod retry_policy;
pub mod test_support;
pub mod time;

pub use context::{ProcessingContext, ProcessingResult};
pub use error::{ErrorInfo, ErrorKind, HeroMessagingError};
pub use facade::HeroMessaging;
pub use message::{Command, Envelope, Event, Metadata, MetadataValue, Query};
pub use pipeline::{PipelineBuilder, Processor};
pub use registry::Registry;
pub use retry_observer::RetryObserver;
pub use time::{SystemTimeProvider, TimeProvider};
