//! ProcessingContext and ProcessingResult (spec.md §3).
//!
//! `ProcessingContext` is an immutable value threaded through the pipeline;
//! every decorator that needs to change it derives a new context rather
//! than mutating one in place (Design Notes: no ambient/thread-local
//! scope).

use crate::error::ErrorInfo;
use crate::message::{Metadata, MetadataValue};
use crate::retry_observer::RetryObserver;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ProcessingContext {
    pub component: String,
    pub retry_count: u32,
    pub first_failure_time: Option<DateTime<Utc>>,
    pub metadata: Metadata,
    /// Side channel for decorators positioned outside `RetryDecorator` in
    /// the fixed pipeline order to observe its internal retries. See
    /// [`crate::retry_observer`].
    pub retry_observer: Option<Arc<dyn RetryObserver>>,
}

impl ProcessingContext {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            retry_count: 0,
            first_failure_time: None,
            metadata: Metadata::new(),
            retry_observer: None,
        }
    }

    /// Derive a context bumped to `retry_count`, setting `first_failure_time`
    /// only if it was not already set (spec.md: "set on first failure,
    /// preserved thereafter").
    pub fn with_retry(&self, retry_count: u32, first_failure_time: DateTime<Utc>) -> Self {
        Self {
            component: self.component.clone(),
            retry_count,
            first_failure_time: Some(self.first_failure_time.unwrap_or(first_failure_time)),
            metadata: self.metadata.clone(),
            retry_observer: self.retry_observer.clone(),
        }
    }

    pub fn with_metadata(&self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        let mut metadata = self.metadata.clone();
        metadata.insert(key.into(), value.into());
        Self {
            component: self.component.clone(),
            retry_count: self.retry_count,
            first_failure_time: self.first_failure_time,
            metadata,
            retry_observer: self.retry_observer.clone(),
        }
    }

    /// Install an observer that `RetryDecorator` will notify on every
    /// attempt it retries. Used by decorators that sit outside Retry in the
    /// fixed chain order (Logging, Metrics) to stay retry-aware without
    /// moving inside it. Composes with any observer already present rather
    /// than replacing it, so multiple outer decorators can each attach
    /// their own without clobbering one another.
    pub fn with_retry_observer(&self, observer: Arc<dyn RetryObserver>) -> Self {
        Self {
            component: self.component.clone(),
            retry_count: self.retry_count,
            first_failure_time: self.first_failure_time,
            metadata: self.metadata.clone(),
            retry_observer: Some(crate::retry_observer::chain(self.retry_observer.clone(), observer)),
        }
    }
}

/// Outcome of a single `process` call. Decorators convert bounded failures
/// into this value rather than raising; only unexpected host errors
/// propagate as [`crate::error::HeroMessagingError`].
///
/// spec.md §3 defines `ProcessingResult` as `{success, exception, message}`
/// with no payload slot. Commands and queries need to carry their handler's
/// return value back through the same decorator chain, so this type adds a
/// generic `response: Option<R>` (defaulted to `()` for events) — an
/// explicit resolution of an otherwise-unspecified point, recorded in
/// DESIGN.md.
#[derive(Debug, Clone)]
pub struct ProcessingResult<R = ()> {
    pub success: bool,
    pub exception: Option<ErrorInfo>,
    pub message: Option<String>,
    pub response: Option<R>,
}

impl<R> ProcessingResult<R> {
    pub fn successful() -> Self {
        Self {
            success: true,
            exception: None,
            message: None,
            response: None,
        }
    }

    pub fn with_response(response: R) -> Self {
        Self {
            success: true,
            exception: None,
            message: None,
            response: Some(response),
        }
    }

    pub fn failed(exception: ErrorInfo, message: impl Into<String>) -> Self {
        Self {
            success: false,
            exception: Some(exception),
            message: Some(message.into()),
            response: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        !self.success
    }

    /// Re-tag a result's response type while preserving success/exception;
    /// used when a decorator needs to build a failure of type `R2` from a
    /// failure already observed as `R`.
    pub fn retype<R2>(&self) -> ProcessingResult<R2> {
        ProcessingResult {
            success: self.success,
            exception: self.exception.clone(),
            message: self.message.clone(),
            response: None,
        }
    }
}
