//! Error types for the transform pipeline.
//!
//! Pipeline failures are reported to the browser rather than crashing the
//! server, so every variant carries enough context to render a useful
//! console message for the file that failed.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while loading, transforming, or emitting a module.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The module file could not be read from disk.
    #[error("failed to read {}: {source}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A plugin hook failed for this module.
    #[error("plugin {plugin} failed on {}: {message}", .path.display())]
    Plugin {
        plugin: String,
        path: PathBuf,
        message: String,
    },

    /// No plugin produced JavaScript for a non-JavaScript module type.
    #[error("no plugin handles {module_type} module {}", .path.display())]
    Unsupported { path: PathBuf, module_type: String },

    /// The module source failed to parse as an ES module.
    #[error("parse error in {} at {line}:{column}: {message}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        column: usize,
        message: String,
        frame: String,
    },

    /// Source map merging or serialization failed.
    #[error("source map error: {0}")]
    SourceMap(String),
}

impl PipelineError {
    /// Shorthand for a plugin hard failure.
    pub fn plugin(
        plugin: impl Into<String>,
        path: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        PipelineError::Plugin {
            plugin: plugin.into(),
            path: path.into(),
            message: message.into(),
        }
    }

    /// Multi-line text for the browser console, including the code frame
    /// for parse errors.
    pub fn diagnostic(&self) -> String {
        match self {
            PipelineError::Parse { frame, .. } if !frame.is_empty() => {
                format!("{self}\n{frame}")
            }
            _ => self.to_string(),
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
