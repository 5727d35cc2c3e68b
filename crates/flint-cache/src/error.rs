//! Error types for cache operations.

use thiserror::Error;

/// Errors from cache storage operations.
///
/// A miss is never an error; these cover genuine I/O and serialization
/// failures. Background flush failures are logged rather than surfaced, so
/// a failing disk degrades the server to transform-every-time instead of
/// taking it down.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error reading or writing cache files.
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata could not be serialized or deserialized.
    #[error("cache metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    /// Cache directory contents are inconsistent.
    #[error("cache corrupted: {0}")]
    Corrupted(String),
}

/// Result type alias using `CacheError` as the default error type.
pub type Result<T, E = CacheError> = std::result::Result<T, E>;
