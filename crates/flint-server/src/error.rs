//! Error types for server startup and lifecycle.

use thiserror::Error;

/// Errors raised while starting or running the module server.
///
/// Per-request transform failures never appear here; those degrade to
/// synthetic console-error modules so the browser stays diagnosable while
/// the server keeps running.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen socket could not be bound.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The artifact cache could not be opened or verified.
    #[error(transparent)]
    Cache(#[from] flint_cache::CacheError),

    /// Plugin setup or teardown failed.
    #[error(transparent)]
    Pipeline(#[from] flint_pipeline::PipelineError),

    /// The OS file watcher could not be created.
    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// Serving HTTP connections failed.
    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using `ServerError` as the default error type.
pub type Result<T, E = ServerError> = std::result::Result<T, E>;
