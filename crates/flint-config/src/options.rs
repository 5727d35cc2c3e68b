//! Server options.

use crate::{PathMatcher, ServerAddr};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Options for a module server instance.
///
/// Constructed programmatically; there is no config-file discovery. Every
/// field has a workable default so `ServerOptions::new(root)` is enough for
/// a plain JavaScript project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerOptions {
    /// Project root the server transforms files under.
    pub root: PathBuf,

    /// Directory for persisted artifacts and metadata.
    ///
    /// Defaults to `<root>/.flint`.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Address the server is reachable at; baked into rewritten imports.
    #[serde(default)]
    pub address: ServerAddr,

    /// Extension list tried in order when a specifier has none.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Bare-specifier aliases applied before `node_modules` lookup.
    #[serde(default)]
    pub aliases: FxHashMap<String, String>,

    /// Files eligible for watch registration.
    #[serde(default = "default_watch")]
    pub watch: PathMatcher,

    /// Files that get source maps; everything else skips map work entirely.
    #[serde(default)]
    pub source_maps: PathMatcher,

    /// Coalescing window for file change events, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_extensions() -> Vec<String> {
    ["js", "mjs", "cjs", "json"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_watch() -> PathMatcher {
    PathMatcher::excluding(["node_modules", ".git", ".flint"])
}

fn default_debounce_ms() -> u64 {
    100
}

impl ServerOptions {
    /// Options for a project rooted at `root`, with defaults everywhere else.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache_dir: None,
            address: ServerAddr::default(),
            extensions: default_extensions(),
            aliases: FxHashMap::default(),
            watch: default_watch(),
            source_maps: PathMatcher::any(),
            debounce_ms: default_debounce_ms(),
        }
    }

    /// Override the server address.
    pub fn with_address(mut self, address: ServerAddr) -> Self {
        self.address = address;
        self
    }

    /// Override the cache directory.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Add a bare-specifier alias.
    pub fn with_alias(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.aliases.insert(from.into(), to.into());
        self
    }

    /// Override the resolution extension order.
    pub fn with_extensions(mut self, exts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extensions = exts.into_iter().map(Into::into).collect();
        self
    }

    /// Override the watch matcher.
    pub fn with_watch(mut self, watch: PathMatcher) -> Self {
        self.watch = watch;
        self
    }

    /// Override the source-map matcher.
    pub fn with_source_maps(mut self, source_maps: PathMatcher) -> Self {
        self.source_maps = source_maps;
        self
    }

    /// Override the debounce window.
    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    /// Resolved cache directory (defaults to `<root>/.flint`).
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.root.join(".flint"))
    }

    /// Debounce window as a `Duration`.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
