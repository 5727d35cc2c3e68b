//! Built-in plugins registered behind user plugins.
//!
//! `FsLoader` is the catch-all `load` hook; `JsonPlugin` and `CssPlugin`
//! coerce their module types into JavaScript so the browser can import
//! `.json` and `.css` files directly.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{PipelineError, Result};
use crate::plugin::{HookSet, LoadOutput, ModuleType, Plugin};

/// Reads module text straight from disk, typing it by extension.
pub struct FsLoader;

#[async_trait]
impl Plugin for FsLoader {
    fn name(&self) -> &str {
        "flint:fs"
    }

    fn hooks(&self) -> HookSet {
        HookSet {
            load: true,
            ..HookSet::default()
        }
    }

    async fn load(&self, path: &Path) -> Result<Option<LoadOutput>> {
        let code = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| PipelineError::Load {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Some(LoadOutput::new(code, ModuleType::from_path(path))))
    }
}

/// Turns a JSON document into a module with the document as its default
/// export. JSON is a syntactic subset of a JavaScript expression, so the
/// text is embedded verbatim after a validity check.
pub struct JsonPlugin;

#[async_trait]
impl Plugin for JsonPlugin {
    fn name(&self) -> &str {
        "flint:json"
    }

    fn hooks(&self) -> HookSet {
        HookSet {
            transform_into_js: true,
            ..HookSet::default()
        }
    }

    fn cache_key(&self) -> String {
        "1".to_string()
    }

    async fn transform_into_js(
        &self,
        path: &Path,
        code: &str,
        module_type: &ModuleType,
    ) -> Result<Option<String>> {
        if *module_type != ModuleType::Json {
            return Ok(None);
        }
        if let Err(err) = serde_json::from_str::<serde_json::Value>(code) {
            return Err(PipelineError::plugin(self.name(), path, err.to_string()));
        }
        Ok(Some(format!("export default {};\n", code.trim_end())))
    }
}

/// Turns a stylesheet into a module that injects a `<style>` tag keyed by
/// the source path. The module self-accepts hot updates, so editing a
/// stylesheet swaps its text in place without a page reload.
pub struct CssPlugin;

#[async_trait]
impl Plugin for CssPlugin {
    fn name(&self) -> &str {
        "flint:css"
    }

    fn hooks(&self) -> HookSet {
        HookSet {
            transform_into_js: true,
            ..HookSet::default()
        }
    }

    fn cache_key(&self) -> String {
        "1".to_string()
    }

    async fn transform_into_js(
        &self,
        path: &Path,
        code: &str,
        module_type: &ModuleType,
    ) -> Result<Option<String>> {
        if *module_type != ModuleType::Css {
            return Ok(None);
        }
        let id = serde_json::to_string(&path.display().to_string())
            .map_err(|err| PipelineError::plugin(self.name(), path, err.to_string()))?;
        let css = serde_json::to_string(code)
            .map_err(|err| PipelineError::plugin(self.name(), path, err.to_string()))?;
        Ok(Some(format!(
            r#"const id = {id};
const css = {css};
let el = document.querySelector(`style[data-flint-id=${{JSON.stringify(id)}}]`);
if (!el) {{
  el = document.createElement("style");
  el.setAttribute("data-flint-id", id);
  document.head.appendChild(el);
}}
el.textContent = css;
if (import.meta.hot) {{
  import.meta.hot.accept();
}}
export default css;
"#
        )))
    }
}
