//! Error types for the Quotagate library.

use thiserror::Error;

use crate::limit::{Counting, QuotaScope};

/// Main error type for Quotagate operations.
#[derive(Error, Debug)]
pub enum QuotagateError {
    /// A quota was exceeded; the request must be throttled.
    #[error(transparent)]
    Throttled(#[from] ThrottleRejection),

    /// The shared counter store failed to answer a check. The request is
    /// aborted rather than failing open; the detail string is kept for logs
    /// but never shown to callers.
    #[error("rate limit backend unavailable")]
    Backend(String),

    /// Configuration-related errors
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redis::RedisError> for QuotagateError {
    fn from(err: redis::RedisError) -> Self {
        QuotagateError::Backend(err.to_string())
    }
}

/// A structured throttling decision.
///
/// Carries the scope, window, and numeric limit that were exceeded so
/// callers (and tests) can inspect fields instead of parsing prose. The
/// caller-visible message is built here and nowhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleRejection {
    /// The quota scope that rejected the request
    pub scope: QuotaScope,
    /// Whether the total or the success-only counter rejected it
    pub counting: Counting,
    /// Length of the enforcement window, in seconds
    pub window_secs: u64,
    /// The configured maximum that was reached
    pub limit: i64,
}

impl std::fmt::Display for ThrottleRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.counting {
            Counting::Total => write!(
                f,
                "{} total request limit reached: at most {} requests per {}s, including failed requests",
                self.scope.describe(),
                self.limit,
                self.window_secs
            ),
            Counting::Success => write!(
                f,
                "{} request limit reached: at most {} requests per {}s",
                self.scope.describe(),
                self.limit,
                self.window_secs
            ),
        }
    }
}

impl std::error::Error for ThrottleRejection {}

/// Result type alias for Quotagate operations.
pub type Result<T> = std::result::Result<T, QuotagateError>;
