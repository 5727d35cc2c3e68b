//! Plugin contract for the transform pipeline.
//!
//! Every hook is optional. A plugin advertises which hooks it implements
//! through [`Plugin::hooks`], and the container indexes plugins into per-hook
//! arrays once at registration, so dispatch never probes absent hooks.
//!
//! Hooks distinguish two failure modes: returning `Ok(None)` means "not
//! applicable, try the next plugin", while `Err` is a hard failure that
//! aborts the pipeline for that file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use oxc_ast::ast::Program;
use oxc_ast::AstBuilder;

use flint_config::ServerOptions;

use crate::error::Result;

/// Declared type of a module, derived from its extension unless a plugin
/// overrides it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleType {
    JavaScript,
    Json,
    Css,
    /// Any other extension. Served only if a plugin coerces it to JavaScript.
    Other(String),
}

impl ModuleType {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        match ext {
            "js" | "mjs" | "cjs" => ModuleType::JavaScript,
            "json" => ModuleType::Json,
            "css" => ModuleType::Css,
            other => ModuleType::Other(other.to_string()),
        }
    }

    pub fn is_javascript(&self) -> bool {
        matches!(self, ModuleType::JavaScript)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ModuleType::JavaScript => "js",
            ModuleType::Json => "json",
            ModuleType::Css => "css",
            ModuleType::Other(ext) => ext,
        }
    }
}

impl std::fmt::Display for ModuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which optional hooks a plugin implements.
///
/// The container reads this once at registration to build its hook arrays;
/// a plugin whose flag is `false` is never called for that hook even if it
/// overrides the trait method.
#[derive(Debug, Clone, Copy, Default)]
pub struct HookSet {
    pub resolve: bool,
    pub load: bool,
    pub transform_content: bool,
    pub transform_into_js: bool,
    pub transform_ast: bool,
}

/// Result of a `load` hook: raw module text plus its declared type and an
/// optional input source map produced by an earlier build step.
#[derive(Debug, Clone)]
pub struct LoadOutput {
    pub code: String,
    pub module_type: ModuleType,
    pub map: Option<String>,
}

impl LoadOutput {
    pub fn new(code: String, module_type: ModuleType) -> Self {
        Self {
            code,
            module_type,
            map: None,
        }
    }
}

/// Result of a `transform_content` hook.
#[derive(Debug, Clone)]
pub struct ContentOutput {
    pub code: String,
    /// Source map fragment for this rewrite, merged into the accumulated
    /// chain by the processor.
    pub map: Option<String>,
    /// New declared type, if the rewrite changed it.
    pub module_type: Option<ModuleType>,
}

impl ContentOutput {
    pub fn code(code: String) -> Self {
        Self {
            code,
            map: None,
            module_type: None,
        }
    }
}

/// A pluggable transform unit.
///
/// Hooks run in registration order. `load` and `transform_into_js`
/// short-circuit on the first plugin that produces a result;
/// `transform_content` and `transform_ast` run every registered plugin,
/// each seeing the previous one's output.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable name, used in diagnostics and in the cache fingerprint.
    fn name(&self) -> &str;

    /// Which optional hooks this plugin implements.
    fn hooks(&self) -> HookSet;

    /// Called once when the server starts, before any module request.
    async fn setup(&self, _options: &ServerOptions) -> Result<()> {
        Ok(())
    }

    /// Called once at shutdown.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// Configuration fingerprint contribution. When any plugin's key changes
    /// between runs, the on-disk cache is discarded wholesale.
    fn cache_key(&self) -> String {
        String::new()
    }

    /// Map an import specifier to an absolute file path, ahead of the
    /// default resolver. `Ok(None)` falls through to the next plugin.
    async fn resolve(&self, _specifier: &str, _importer: &Path) -> Result<Option<PathBuf>> {
        Ok(None)
    }

    /// Produce the raw text and declared type for a path. First plugin to
    /// return `Some` wins.
    async fn load(&self, _path: &Path) -> Result<Option<LoadOutput>> {
        Ok(None)
    }

    /// Rewrite module text, optionally changing its declared type and
    /// contributing a source map fragment.
    async fn transform_content(
        &self,
        _path: &Path,
        _code: &str,
        _module_type: &ModuleType,
    ) -> Result<Option<ContentOutput>> {
        Ok(None)
    }

    /// Coerce a non-JavaScript module into JavaScript source. Only called
    /// while the declared type is not already JavaScript.
    async fn transform_into_js(
        &self,
        _path: &Path,
        _code: &str,
        _module_type: &ModuleType,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    /// Mutate the parsed program in place. Runs on a fresh parse every time
    /// the file is transformed, so implementations must produce the same
    /// output for the same source text.
    fn transform_ast<'a>(&self, _ast: &AstBuilder<'a>, _program: &mut Program<'a>) {}
}
