//! Error types for stash.
//!
//! This module provides the error hierarchy using `thiserror`.
//! Errors are `Clone` because a shared promise hands the same output to
//! every consumer awaiting it.

use std::sync::Arc;

use thiserror::Error;

/// Result type alias using `StashError`.
pub type Result<T> = std::result::Result<T, StashError>;

/// A producer failure shared between every consumer of one cache entry.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for all stash operations.
#[derive(Debug, Clone, Error)]
pub enum StashError {
    // ═══════════════════════════════════════════════════════════════════════════
    // PRODUCER ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// The underlying asynchronous operation failed.
    ///
    /// Propagated unchanged to every consumer of the entry; never retried.
    #[error("Producer rejected: {0}")]
    ProducerRejected(#[source] SharedError),

    // ═══════════════════════════════════════════════════════════════════════════
    // KEY ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Arguments could not be rendered into a cache key.
    #[error("Key serialization failed: {0}")]
    KeySerialization(String),

    /// A cached value was read back as a different type than it was stored with.
    #[error("Type mismatch for key '{key}': expected {expected}")]
    TypeMismatch {
        /// The cache key that was read
        key: String,
        /// Name of the type the reader asked for
        expected: &'static str,
    },

    // ═══════════════════════════════════════════════════════════════════════════
    // LIFECYCLE ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// The consumer was torn down while waiting for a change.
    #[error("Consumer torn down")]
    Cancelled,

    // ═══════════════════════════════════════════════════════════════════════════
    // CONFIGURATION ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // ═══════════════════════════════════════════════════════════════════════════
    // INTERNAL ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Internal invariant violation (should never happen).
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Plain-text rejection reason.
#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

impl StashError {
    /// Wraps any error as a producer rejection.
    pub fn rejected<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StashError::ProducerRejected(Arc::new(err))
    }

    /// Creates a producer rejection from a message.
    pub fn rejected_msg(msg: impl Into<String>) -> Self {
        Self::rejected(Message(msg.into()))
    }

    /// Returns true if this error came from a producer.
    pub fn is_producer_error(&self) -> bool {
        matches!(self, StashError::ProducerRejected(_))
    }

    /// Returns true if this is a configuration error.
    pub fn is_config_error(&self) -> bool {
        matches!(self, StashError::ConfigError(_))
    }
}

impl From<serde_json::Error> for StashError {
    fn from(err: serde_json::Error) -> Self {
        StashError::KeySerialization(err.to_string())
    }
}
