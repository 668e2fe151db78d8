//! Error taxonomy for the messaging core.
//!
//! `HeroMessagingError` is the exception-level type: decorators rethrow it
//! for unexpected host errors. Bounded, expected failures (validation,
//! policy denial, retry exhaustion) are represented as data via
//! [`crate::context::ProcessingResult`], never as this error type, per the
//! Design Notes' "exceptions signal the unexpected" rule.

use thiserror::Error;

/// Coarse classification used by the retry decorator and circuit breaker
/// to decide whether a failure is retry-eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input failed a declared validation rule. Never retried.
    Validation,
    /// Timeout, peer cancellation, transport hiccup. Retryable per policy.
    Transient,
    /// Circuit open, rate limit exceeded, idempotency replay. Not retried
    /// automatically.
    PolicyDenied,
    /// Handler-thrown error not classified as transient. Escalated by
    /// default.
    HandlerError,
    /// Out-of-memory, stack-overflow, access-violation class. Never
    /// retried, always propagated.
    Critical,
    /// Storage/transport failure. Subject to outbox/inbox retry.
    InfrastructureError,
}

impl ErrorKind {
    /// Matches the retry decorator's `shouldRetry` base classification
    /// (spec.md §4.2.8): critical errors are never retried; transient and
    /// infrastructure errors are retry-eligible by default.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::InfrastructureError)
    }
}

/// Structured error info carried by a failed [`crate::context::ProcessingResult`].
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    /// Present for `PolicyDenied` (rate limit, circuit breaker) outcomes.
    pub retry_after: Option<std::time::Duration>,
    /// Chain of causes, innermost last, used by the retry decorator's
    /// recursive transient-cause inspection.
    pub causes: Vec<String>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
            causes: Vec::new(),
        }
    }

    pub fn with_retry_after(mut self, retry_after: std::time::Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    /// Recursive transient-cause inspection mandated by spec.md §4.2.8:
    /// treat the error as retry-eligible if its own kind is retryable, or
    /// if any recorded cause string looks like a timeout/cancellation.
    pub fn is_retryable(&self) -> bool {
        if self.kind.is_retryable() {
            return true;
        }
        self.causes.iter().any(|c| {
            let lower = c.to_lowercase();
            lower.contains("timeout") || lower.contains("cancel")
        })
    }
}

/// Exception-level error type for unexpected host failures. Kept separate
/// from `ErrorInfo` so the pipeline's value-level failures never need to be
/// downcast out of an error trait object.
#[derive(Error, Debug)]
pub enum HeroMessagingError {
    #[error("no handler registered for message type {0}")]
    NoHandler(String),

    #[error("handler for {0} panicked or returned an unexpected error: {1}")]
    HandlerFailed(String, String),

    #[error("operation was cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("critical error: {0}")]
    Critical(String),
}
