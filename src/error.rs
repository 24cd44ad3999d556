//! Error types for feedloop.

use thiserror::Error;

/// Common error type for feedloop operations.
#[derive(Error, Debug)]
pub enum FeedLoopError {
    /// Transient fetch failure (network, timeout, HTTP 5xx/429).
    ///
    /// Eligible for in-process retry within the current refresh cycle.
    #[error("retryable fetch error: {0}")]
    RetryableFetch(String),

    /// Permanent fetch failure (malformed content, HTTP 4xx other than 429).
    #[error("fetch error: {0}")]
    NonRetryableFetch(String),

    /// Another worker already holds the refresh lock for this feed.
    ///
    /// This is an expected control-flow signal, not a failure.
    #[error("refresh already in flight for feed {0}")]
    LockContention(i64),

    /// A domain rate limit wait exceeded its budget.
    #[error("rate limit wait for {host} exceeded {max_wait_ms}ms")]
    RateLimitTimeout { host: String, max_wait_ms: u64 },

    /// Database error.
    ///
    /// Treated as retryable: a transient persistence failure should not
    /// immediately surface as a terminal feed failure.
    #[error("database error: {0}")]
    Database(String),

    /// Persisted or queued state contradicts a scheduling invariant
    /// (e.g. a feed disappeared between enqueue and execution).
    #[error("scheduling invariant violation: {0}")]
    InvariantViolation(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FeedLoopError {
    /// Whether the error is eligible for an in-process retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FeedLoopError::RetryableFetch(_)
                | FeedLoopError::Database(_)
                | FeedLoopError::RateLimitTimeout { .. }
        )
    }
}

// Conversion from sqlx errors
impl From<sqlx::Error> for FeedLoopError {
    fn from(e: sqlx::Error) -> Self {
        FeedLoopError::Database(e.to_string())
    }
}

/// Result type alias for feedloop operations.
pub type Result<T> = std::result::Result<T, FeedLoopError>;
