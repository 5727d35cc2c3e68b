//! Per-file transform pipeline.
//!
//! Turns a source file on disk into browser-servable JavaScript: plugin
//! hooks load and rewrite the text, non-JS types are coerced to modules,
//! imports are resolved and rewritten to request URLs, dynamic imports and
//! hot-reload usage are wired to the browser runtime, and per-step source
//! maps are folded into one.
//!
//! The pipeline is deliberately stateless per call; caching and dependency
//! bookkeeping live with the caller.

mod builtin;
mod diagnostics;
mod error;
mod plugin;
mod processor;
mod registry;
mod rewrite;
mod scan;
mod sourcemap;

pub use builtin::{CssPlugin, FsLoader, JsonPlugin};
pub use diagnostics::{code_frame, offset_to_line_col};
pub use error::{PipelineError, Result};
pub use plugin::{ContentOutput, HookSet, LoadOutput, ModuleType, Plugin};
pub use processor::{TransformProcessor, TransformResult};
pub use registry::{ContentChain, PluginContainer};
pub use rewrite::{RewriteOutcome, CLIENT_MODULE_PATH, HOT_HELPER_FN, IMPORT_HELPER_FN};
pub use scan::{ImportScan, ScanOutcome, RESOLVE_MARKER};
pub use sourcemap::{fold, merge, parse as parse_map, serialize as serialize_map};
