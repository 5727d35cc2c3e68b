//! Hook registry over an ordered list of plugins.
//!
//! The container indexes plugins into one array per hook at construction
//! time, so per-request dispatch touches only plugins that declared the
//! hook. Array order is registration order, which is the documented
//! first-match-wins order for `load` and `transform_into_js`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use oxc_ast::ast::Program;
use oxc_ast::AstBuilder;
use tracing::debug;

use flint_config::ServerOptions;

use crate::builtin::{CssPlugin, FsLoader, JsonPlugin};
use crate::error::{PipelineError, Result};
use crate::plugin::{LoadOutput, ModuleType, Plugin};

/// Output of the content-transform chain: final text and type, plus every
/// source map fragment the hooks produced, in application order.
#[derive(Debug)]
pub struct ContentChain {
    pub code: String,
    pub module_type: ModuleType,
    pub maps: Vec<String>,
}

pub struct PluginContainer {
    plugins: Vec<Arc<dyn Plugin>>,
    resolve_hooks: Vec<usize>,
    load_hooks: Vec<usize>,
    content_hooks: Vec<usize>,
    into_js_hooks: Vec<usize>,
    ast_hooks: Vec<usize>,
}

impl PluginContainer {
    /// Index an ordered plugin list into per-hook dispatch arrays.
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        let mut container = Self {
            plugins,
            resolve_hooks: Vec::new(),
            load_hooks: Vec::new(),
            content_hooks: Vec::new(),
            into_js_hooks: Vec::new(),
            ast_hooks: Vec::new(),
        };
        for (idx, plugin) in container.plugins.iter().enumerate() {
            let hooks = plugin.hooks();
            if hooks.resolve {
                container.resolve_hooks.push(idx);
            }
            if hooks.load {
                container.load_hooks.push(idx);
            }
            if hooks.transform_content {
                container.content_hooks.push(idx);
            }
            if hooks.transform_into_js {
                container.into_js_hooks.push(idx);
            }
            if hooks.transform_ast {
                container.ast_hooks.push(idx);
            }
        }
        container
    }

    /// User plugins followed by the built-in JSON, CSS, and filesystem
    /// loaders. The filesystem loader sits last so any user `load` hook
    /// wins before it.
    pub fn with_defaults(user: Vec<Arc<dyn Plugin>>) -> Self {
        let mut plugins = user;
        plugins.push(Arc::new(JsonPlugin));
        plugins.push(Arc::new(CssPlugin));
        plugins.push(Arc::new(FsLoader));
        Self::new(plugins)
    }

    /// Combined plugin configuration fingerprint. Changing any plugin's
    /// name or cache key yields a different string, which invalidates the
    /// on-disk cache at startup.
    pub fn cache_fingerprint(&self) -> String {
        let mut out = String::new();
        for plugin in &self.plugins {
            out.push_str(plugin.name());
            out.push('=');
            out.push_str(&plugin.cache_key());
            out.push(';');
        }
        out
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Run every plugin's `setup` in registration order.
    pub async fn setup(&self, options: &ServerOptions) -> Result<()> {
        for plugin in &self.plugins {
            plugin.setup(options).await?;
        }
        Ok(())
    }

    /// Run every plugin's `stop`, in reverse registration order.
    pub async fn stop(&self) -> Result<()> {
        for plugin in self.plugins.iter().rev() {
            plugin.stop().await?;
        }
        Ok(())
    }

    /// First `resolve` hook to return a path wins. A hook error is a hard
    /// failure for the importing file.
    pub async fn resolve(&self, specifier: &str, importer: &Path) -> Result<Option<PathBuf>> {
        for &idx in &self.resolve_hooks {
            let plugin = &self.plugins[idx];
            if let Some(path) = plugin.resolve(specifier, importer).await? {
                debug!(
                    plugin = plugin.name(),
                    specifier,
                    path = %path.display(),
                    "resolve hook matched"
                );
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    /// First `load` hook to return module text wins.
    pub async fn load(&self, path: &Path) -> Result<Option<LoadOutput>> {
        for &idx in &self.load_hooks {
            let plugin = &self.plugins[idx];
            if let Some(output) = plugin.load(path).await? {
                debug!(
                    plugin = plugin.name(),
                    path = %path.display(),
                    module_type = %output.module_type,
                    "load hook matched"
                );
                return Ok(Some(output));
            }
        }
        Ok(None)
    }

    /// Apply every `transform_content` hook in order. Each hook sees the
    /// previous hook's output and may rewrite the declared type.
    pub async fn transform_content(
        &self,
        path: &Path,
        code: String,
        module_type: ModuleType,
    ) -> Result<ContentChain> {
        let mut chain = ContentChain {
            code,
            module_type,
            maps: Vec::new(),
        };
        for &idx in &self.content_hooks {
            let plugin = &self.plugins[idx];
            if let Some(output) = plugin
                .transform_content(path, &chain.code, &chain.module_type)
                .await?
            {
                chain.code = output.code;
                if let Some(map) = output.map {
                    chain.maps.push(map);
                }
                if let Some(module_type) = output.module_type {
                    chain.module_type = module_type;
                }
            }
        }
        Ok(chain)
    }

    /// Coerce non-JavaScript text into JavaScript. JavaScript input passes
    /// through untouched; otherwise the first hook to succeed wins, and if
    /// none does the file type is unsupported.
    pub async fn transform_into_js(
        &self,
        path: &Path,
        code: String,
        module_type: &ModuleType,
    ) -> Result<String> {
        if module_type.is_javascript() {
            return Ok(code);
        }
        for &idx in &self.into_js_hooks {
            let plugin = &self.plugins[idx];
            if let Some(js) = plugin.transform_into_js(path, &code, module_type).await? {
                debug!(
                    plugin = plugin.name(),
                    path = %path.display(),
                    from = %module_type,
                    "coerced module to JavaScript"
                );
                return Ok(js);
            }
        }
        Err(PipelineError::Unsupported {
            path: path.to_path_buf(),
            module_type: module_type.to_string(),
        })
    }

    /// Run every `transform_ast` hook in order against the shared program.
    pub fn transform_ast<'a>(&self, ast: &AstBuilder<'a>, program: &mut Program<'a>) {
        for &idx in &self.ast_hooks {
            self.plugins[idx].transform_ast(ast, program);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::plugin::{ContentOutput, HookSet};

    #[derive(Default)]
    struct StubPlugin {
        name: &'static str,
        hooks: HookSet,
        resolve_to: Option<PathBuf>,
        load_to: Option<(String, ModuleType)>,
        content_suffix: Option<&'static str>,
        content_map: Option<&'static str>,
        into_js_to: Option<&'static str>,
        fail_resolve: bool,
        calls: Mutex<Vec<String>>,
    }

    impl StubPlugin {
        fn record(&self, hook: &str) {
            self.calls.lock().unwrap().push(hook.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Plugin for StubPlugin {
        fn name(&self) -> &str {
            self.name
        }

        fn hooks(&self) -> HookSet {
            self.hooks
        }

        fn cache_key(&self) -> String {
            format!("v-{}", self.name)
        }

        async fn resolve(&self, _specifier: &str, _importer: &Path) -> Result<Option<PathBuf>> {
            self.record("resolve");
            if self.fail_resolve {
                return Err(PipelineError::plugin(self.name, "/x.js", "boom"));
            }
            Ok(self.resolve_to.clone())
        }

        async fn load(&self, _path: &Path) -> Result<Option<LoadOutput>> {
            self.record("load");
            Ok(self
                .load_to
                .clone()
                .map(|(code, ty)| LoadOutput::new(code, ty)))
        }

        async fn transform_content(
            &self,
            _path: &Path,
            code: &str,
            _module_type: &ModuleType,
        ) -> Result<Option<ContentOutput>> {
            self.record("content");
            let Some(suffix) = self.content_suffix else {
                return Ok(None);
            };
            Ok(Some(ContentOutput {
                code: format!("{code}{suffix}"),
                map: self.content_map.map(str::to_string),
                module_type: None,
            }))
        }

        async fn transform_into_js(
            &self,
            _path: &Path,
            _code: &str,
            _module_type: &ModuleType,
        ) -> Result<Option<String>> {
            self.record("into_js");
            Ok(self.into_js_to.map(str::to_string))
        }
    }

    fn plugin(name: &'static str) -> StubPlugin {
        StubPlugin {
            name,
            ..StubPlugin::default()
        }
    }

    #[tokio::test]
    async fn resolve_short_circuits_in_registration_order() {
        let first = Arc::new(StubPlugin {
            hooks: HookSet {
                resolve: true,
                ..HookSet::default()
            },
            resolve_to: Some(PathBuf::from("/from-first.js")),
            ..plugin("first")
        });
        let second = Arc::new(StubPlugin {
            hooks: HookSet {
                resolve: true,
                ..HookSet::default()
            },
            resolve_to: Some(PathBuf::from("/from-second.js")),
            ..plugin("second")
        });
        let container =
            PluginContainer::new(vec![first.clone() as Arc<dyn Plugin>, second.clone()]);

        let resolved = container
            .resolve("./a", Path::new("/app/main.js"))
            .await
            .unwrap();
        assert_eq!(resolved, Some(PathBuf::from("/from-first.js")));
        assert!(second.calls().is_empty());
    }

    #[tokio::test]
    async fn undeclared_hook_is_never_dispatched() {
        let hidden = Arc::new(StubPlugin {
            // Implements load but does not declare it.
            load_to: Some(("ignored".to_string(), ModuleType::JavaScript)),
            ..plugin("hidden")
        });
        let container = PluginContainer::new(vec![hidden.clone() as Arc<dyn Plugin>]);

        let loaded = container.load(Path::new("/app/main.js")).await.unwrap();
        assert!(loaded.is_none());
        assert!(hidden.calls().is_empty());
    }

    #[tokio::test]
    async fn content_hooks_chain_and_collect_maps() {
        let first = Arc::new(StubPlugin {
            hooks: HookSet {
                transform_content: true,
                ..HookSet::default()
            },
            content_suffix: Some("+one"),
            content_map: Some("map-one"),
            ..plugin("one")
        });
        let second = Arc::new(StubPlugin {
            hooks: HookSet {
                transform_content: true,
                ..HookSet::default()
            },
            content_suffix: Some("+two"),
            ..plugin("two")
        });
        let container = PluginContainer::new(vec![first as Arc<dyn Plugin>, second]);

        let chain = container
            .transform_content(
                Path::new("/app/main.js"),
                "base".to_string(),
                ModuleType::JavaScript,
            )
            .await
            .unwrap();
        assert_eq!(chain.code, "base+one+two");
        assert_eq!(chain.maps, vec!["map-one".to_string()]);
        assert_eq!(chain.module_type, ModuleType::JavaScript);
    }

    #[tokio::test]
    async fn into_js_passes_javascript_through() {
        let coercer = Arc::new(StubPlugin {
            hooks: HookSet {
                transform_into_js: true,
                ..HookSet::default()
            },
            into_js_to: Some("should not run"),
            ..plugin("coercer")
        });
        let container = PluginContainer::new(vec![coercer.clone() as Arc<dyn Plugin>]);

        let js = container
            .transform_into_js(
                Path::new("/app/main.js"),
                "let a = 1;".to_string(),
                &ModuleType::JavaScript,
            )
            .await
            .unwrap();
        assert_eq!(js, "let a = 1;");
        assert!(coercer.calls().is_empty());
    }

    #[tokio::test]
    async fn into_js_without_match_is_unsupported() {
        let container = PluginContainer::new(Vec::new());
        let err = container
            .transform_into_js(
                Path::new("/app/logo.svg"),
                "<svg/>".to_string(),
                &ModuleType::Other("svg".to_string()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Unsupported { .. }));
        assert!(err.to_string().contains("svg"));
    }

    #[tokio::test]
    async fn resolve_hook_error_is_a_hard_failure() {
        let broken = Arc::new(StubPlugin {
            hooks: HookSet {
                resolve: true,
                ..HookSet::default()
            },
            fail_resolve: true,
            ..plugin("broken")
        });
        let container = PluginContainer::new(vec![broken as Arc<dyn Plugin>]);

        let err = container
            .resolve("./a", Path::new("/app/main.js"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Plugin { .. }));
    }

    #[test]
    fn cache_fingerprint_covers_every_plugin() {
        let container = PluginContainer::new(vec![
            Arc::new(plugin("alpha")) as Arc<dyn Plugin>,
            Arc::new(plugin("beta")),
        ]);
        assert_eq!(container.cache_fingerprint(), "alpha=v-alpha;beta=v-beta;");
    }

    #[test]
    fn defaults_put_filesystem_loader_last() {
        let container = PluginContainer::with_defaults(Vec::new());
        assert_eq!(container.len(), 3);
        // Load dispatch must end at the filesystem loader.
        let last = container.load_hooks.last().copied();
        assert_eq!(last, Some(container.len() - 1));
    }
}
