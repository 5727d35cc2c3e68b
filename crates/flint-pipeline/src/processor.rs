//! Drives one file through the full transform chain.
//!
//! The chain is: load raw text, apply content transforms, coerce to
//! JavaScript, then two parse passes. The first pass runs AST hooks and
//! scans for specifiers; every resolution is then dispatched concurrently
//! and awaited; the second pass re-parses, re-runs AST hooks, rewrites
//! imports against the settled resolution table, and generates code. No
//! parsed program is ever held across an await point, so transform futures
//! stay `Send` and many files can be in flight at once.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future;
use oxc_allocator::Allocator;
use oxc_ast::ast::Program;
use oxc_ast::AstBuilder;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_parser::{Parser, ParserReturn};
use oxc_span::SourceType;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use flint_config::ServerOptions;
use flint_resolver::Resolver;

use crate::diagnostics::{code_frame, offset_to_line_col};
use crate::error::{PipelineError, Result};
use crate::plugin::LoadOutput;
use crate::registry::{ContentChain, PluginContainer};
use crate::rewrite::rewrite_program;
use crate::scan::{ImportScan, ScanOutcome};
use crate::sourcemap as smap;

/// Everything the server needs to serve and cache one transformed module.
#[derive(Debug)]
pub struct TransformResult {
    pub code: String,
    /// Folded source map from the generated code back to the original
    /// file, when the file is eligible for maps.
    pub map: Option<String>,
    /// Absolute paths of every resolved direct import.
    pub imports: Vec<PathBuf>,
    /// Some specifier resolved to the unresolved stub endpoint.
    pub had_unresolved: bool,
    /// The module calls `import.meta.hot.accept`.
    pub hot_accepting: bool,
}

pub struct TransformProcessor {
    options: Arc<ServerOptions>,
    resolver: Resolver,
    plugins: Arc<PluginContainer>,
}

struct EmitOutput {
    code: String,
    map: Option<String>,
    imports: Vec<PathBuf>,
    had_unresolved: bool,
}

impl TransformProcessor {
    pub fn new(options: Arc<ServerOptions>, plugins: Arc<PluginContainer>) -> Self {
        let resolver = Resolver::new(options.extensions.clone(), options.aliases.clone());
        Self {
            options,
            resolver,
            plugins,
        }
    }

    pub fn plugins(&self) -> &Arc<PluginContainer> {
        &self.plugins
    }

    pub async fn transform(&self, path: &Path) -> Result<TransformResult> {
        debug!(path = %path.display(), "transforming module");

        let Some(LoadOutput {
            code,
            module_type,
            map: load_map,
        }) = self.plugins.load(path).await?
        else {
            return Err(PipelineError::Load {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no load hook produced this module",
                ),
            });
        };

        let mut prior_maps: Vec<String> = Vec::new();
        if let Some(map) = load_map {
            prior_maps.push(map);
        }

        let ContentChain {
            code,
            module_type,
            maps,
        } = self
            .plugins
            .transform_content(path, code, module_type)
            .await?;
        prior_maps.extend(maps);

        let code = self
            .plugins
            .transform_into_js(path, code, &module_type)
            .await?;

        let scan = self.scan_pass(path, &code, &prior_maps)?;
        let resolutions = self.resolve_all(path, &scan.specifiers).await?;

        let want_map = self.options.source_maps.matches(path);
        let emit = self.emit_pass(path, &code, &resolutions, scan.uses_hot, want_map, &prior_maps)?;

        let map = if want_map {
            let mut full_chain = prior_maps;
            full_chain.extend(emit.map);
            smap::fold(&full_chain)?
        } else {
            None
        };

        debug!(
            path = %path.display(),
            imports = emit.imports.len(),
            unresolved = emit.had_unresolved,
            hot = scan.hot_accepting,
            "module transformed"
        );

        Ok(TransformResult {
            code: emit.code,
            map,
            imports: emit.imports,
            had_unresolved: emit.had_unresolved,
            hot_accepting: scan.hot_accepting,
        })
    }

    /// Resolve one specifier from `importer`: plugin hooks first, then the
    /// default resolver. `Ok(None)` is a soft miss; `Err` is a hook failure.
    pub async fn resolve(&self, importer: &Path, specifier: &str) -> Result<Option<PathBuf>> {
        match self.plugins.resolve(specifier, importer).await? {
            Some(path) => Ok(Some(path)),
            None => Ok(self.resolver.resolve(importer, specifier)),
        }
    }

    /// Resolve every scanned specifier. Tasks are dispatched together; the
    /// rewrite pass only runs once all of them have settled.
    async fn resolve_all(
        &self,
        importer: &Path,
        specifiers: &[String],
    ) -> Result<FxHashMap<String, Option<PathBuf>>> {
        let tasks = specifiers.iter().map(|specifier| async move {
            let resolved = self.resolve(importer, specifier).await?;
            if resolved.is_none() {
                warn!(
                    specifier,
                    importer = %importer.display(),
                    "import did not resolve; serving stub"
                );
            }
            Ok::<_, PipelineError>((specifier.clone(), resolved))
        });

        let mut table = FxHashMap::default();
        for settled in future::join_all(tasks).await {
            let (specifier, resolved) = settled?;
            table.insert(specifier, resolved);
        }
        Ok(table)
    }

    fn scan_pass(&self, path: &Path, code: &str, prior_maps: &[String]) -> Result<ScanOutcome> {
        let allocator = Allocator::default();
        let program = self.parse_and_prepare(&allocator, path, code, prior_maps)?;
        Ok(ImportScan::scan(&program))
    }

    fn emit_pass(
        &self,
        path: &Path,
        code: &str,
        resolutions: &FxHashMap<String, Option<PathBuf>>,
        uses_hot: bool,
        want_map: bool,
        prior_maps: &[String],
    ) -> Result<EmitOutput> {
        let allocator = Allocator::default();
        let mut program = self.parse_and_prepare(&allocator, path, code, prior_maps)?;

        let outcome = rewrite_program(
            &allocator,
            &mut program,
            path,
            &self.options.address,
            resolutions,
            uses_hot,
        );

        let generated = if want_map {
            Codegen::new()
                .with_options(CodegenOptions {
                    source_map_path: Some(path.to_path_buf()),
                    ..CodegenOptions::default()
                })
                .build(&program)
        } else {
            Codegen::new().build(&program)
        };

        Ok(EmitOutput {
            code: generated.code,
            map: generated.map.map(|map| map.to_json_string()),
            imports: outcome.imports,
            had_unresolved: outcome.had_unresolved,
        })
    }

    /// Parse and run AST hooks. Both passes go through here, so AST hooks
    /// see an identical fresh program each time.
    fn parse_and_prepare<'a>(
        &self,
        allocator: &'a Allocator,
        path: &Path,
        code: &'a str,
        prior_maps: &[String],
    ) -> Result<Program<'a>> {
        let ParserReturn {
            mut program,
            errors,
            panicked,
            ..
        } = Parser::new(allocator, code, SourceType::mjs()).parse();

        if !errors.is_empty() || panicked {
            let (message, offset) = match errors.first() {
                Some(error) => {
                    let offset = error
                        .labels
                        .as_ref()
                        .and_then(|labels| labels.first())
                        .map(|label| label.offset())
                        .unwrap_or(0);
                    (error.message.to_string(), offset)
                }
                None => ("parser stopped without a diagnostic".to_string(), 0),
            };
            let (line, column) = offset_to_line_col(code, offset);
            let frame = code_frame(code, line, column);
            let (line, column) = remap_position(prior_maps, line, column);
            return Err(PipelineError::Parse {
                path: path.to_path_buf(),
                line,
                column,
                message,
                frame,
            });
        }

        let ast = AstBuilder::new(allocator);
        self.plugins.transform_ast(&ast, &mut program);
        Ok(program)
    }
}

/// Trace a position in the parsed text back through the content-transform
/// maps to the original file. Positions are 1-based; maps are 0-based.
fn remap_position(maps: &[String], line: usize, column: usize) -> (usize, usize) {
    if maps.is_empty() {
        return (line, column);
    }
    let folded = match smap::fold(maps) {
        Ok(Some(json)) => json,
        _ => return (line, column),
    };
    let map = match smap::parse(&folded) {
        Ok(map) => map,
        Err(_) => return (line, column),
    };
    match map.lookup_token(line.saturating_sub(1) as u32, column.saturating_sub(1) as u32) {
        Some(token) => (
            token.get_src_line() as usize + 1,
            token.get_src_col() as usize + 1,
        ),
        None => (line, column),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use oxc_ast::ast::Statement;
    use tempfile::TempDir;

    use super::*;
    use crate::plugin::{ContentOutput, HookSet, ModuleType, Plugin};
    use crate::registry::PluginContainer;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn processor(root: &Path, extra: Vec<Arc<dyn Plugin>>) -> TransformProcessor {
        let options = Arc::new(ServerOptions::new(root));
        let plugins = Arc::new(PluginContainer::with_defaults(extra));
        TransformProcessor::new(options, plugins)
    }

    #[tokio::test]
    async fn transforms_imports_end_to_end() {
        let dir = TempDir::new().unwrap();
        let util = write(dir.path(), "util.js", "export const n = 1;\n");
        let main = write(
            dir.path(),
            "main.js",
            "import { n } from './util.js';\nexport const x = n + 1;\n",
        );

        let result = processor(dir.path(), Vec::new())
            .transform(&main)
            .await
            .unwrap();

        let url = ServerOptions::new(dir.path()).address.module_url(&util);
        assert!(result.code.contains(&url), "missing {url} in {}", result.code);
        assert_eq!(result.imports, vec![util]);
        assert!(!result.had_unresolved);
        assert!(!result.hot_accepting);
    }

    #[tokio::test]
    async fn unresolved_sibling_does_not_block_the_module() {
        let dir = TempDir::new().unwrap();
        let real = write(dir.path(), "real.js", "export const r = 1;\n");
        let main = write(
            dir.path(),
            "main.js",
            "import './missing.js';\nimport { r } from './real.js';\nexport const x = r;\n",
        );

        let result = processor(dir.path(), Vec::new())
            .transform(&main)
            .await
            .unwrap();

        let addr = ServerOptions::new(dir.path()).address;
        assert!(result
            .code
            .contains(&addr.unresolved_url("./missing.js", &main)));
        assert!(result.code.contains(&addr.module_url(&real)));
        assert!(result.had_unresolved);
        assert_eq!(result.imports, vec![real]);
    }

    #[tokio::test]
    async fn json_module_is_coerced_to_javascript() {
        let dir = TempDir::new().unwrap();
        let data = write(dir.path(), "data.json", "{\"a\": 1}\n");

        let result = processor(dir.path(), Vec::new())
            .transform(&data)
            .await
            .unwrap();

        assert!(result.code.contains("export default"));
        assert!(result.imports.is_empty());
        assert!(!result.had_unresolved);
    }

    #[tokio::test]
    async fn css_module_self_accepts_hot_updates() {
        let dir = TempDir::new().unwrap();
        let style = write(dir.path(), "style.css", "body { color: red; }\n");

        let result = processor(dir.path(), Vec::new())
            .transform(&style)
            .await
            .unwrap();

        assert!(result.hot_accepting);
        assert!(result.code.contains("__flint_hot__("));
        assert!(result.code.contains("/@client.js"));
    }

    #[tokio::test]
    async fn parse_error_carries_position_and_frame() {
        let dir = TempDir::new().unwrap();
        let broken = write(dir.path(), "broken.js", "const = 1;\n");

        let err = processor(dir.path(), Vec::new())
            .transform(&broken)
            .await
            .unwrap_err();

        match err {
            PipelineError::Parse { line, frame, .. } => {
                assert_eq!(line, 1);
                assert!(frame.contains("const = 1;"), "frame was {frame}");
            }
            other => panic!("expected parse error, got {other}"),
        }
    }

    #[tokio::test]
    async fn missing_file_is_a_load_error() {
        let dir = TempDir::new().unwrap();
        let err = processor(dir.path(), Vec::new())
            .transform(&dir.path().join("gone.js"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Load { .. }));
    }

    #[tokio::test]
    async fn unhandled_extension_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let logo = write(dir.path(), "logo.svg", "<svg></svg>\n");

        let err = processor(dir.path(), Vec::new())
            .transform(&logo)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn source_map_produced_for_eligible_files() {
        let dir = TempDir::new().unwrap();
        let main = write(dir.path(), "main.js", "export const a = 1;\n");

        let result = processor(dir.path(), Vec::new())
            .transform(&main)
            .await
            .unwrap();

        let map = result.map.unwrap();
        assert!(map.contains("main.js"));
    }

    #[tokio::test]
    async fn source_map_skipped_when_matcher_excludes() {
        let dir = TempDir::new().unwrap();
        let main = write(dir.path(), "main.js", "export const a = 1;\n");

        let options = Arc::new(
            ServerOptions::new(dir.path())
                .with_source_maps(flint_config::PathMatcher::any().with_extensions(["css"])),
        );
        let plugins = Arc::new(PluginContainer::with_defaults(Vec::new()));
        let result = TransformProcessor::new(options, plugins)
            .transform(&main)
            .await
            .unwrap();

        assert!(result.map.is_none());
    }

    struct StripImports;

    #[async_trait]
    impl Plugin for StripImports {
        fn name(&self) -> &str {
            "test:strip-imports"
        }

        fn hooks(&self) -> HookSet {
            HookSet {
                transform_ast: true,
                ..HookSet::default()
            }
        }

        fn transform_ast<'a>(&self, _ast: &AstBuilder<'a>, program: &mut Program<'a>) {
            program
                .body
                .retain(|stmt| !matches!(stmt, Statement::ImportDeclaration(_)));
        }
    }

    #[tokio::test]
    async fn ast_hooks_run_before_the_import_scan() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "util.js", "export const n = 1;\n");
        let main = write(
            dir.path(),
            "main.js",
            "import { n } from './util.js';\nexport const x = 2;\n",
        );

        let result = processor(dir.path(), vec![Arc::new(StripImports)])
            .transform(&main)
            .await
            .unwrap();

        assert!(result.imports.is_empty());
        assert!(!result.code.contains("@module"));
        assert!(result.code.contains("export const x = 2;"));
    }

    struct DataFiles;

    #[async_trait]
    impl Plugin for DataFiles {
        fn name(&self) -> &str {
            "test:data-files"
        }

        fn hooks(&self) -> HookSet {
            HookSet {
                transform_content: true,
                ..HookSet::default()
            }
        }

        async fn transform_content(
            &self,
            _path: &Path,
            code: &str,
            module_type: &ModuleType,
        ) -> Result<Option<ContentOutput>> {
            if *module_type != ModuleType::Other("data".to_string()) {
                return Ok(None);
            }
            Ok(Some(ContentOutput {
                code: format!("export default {};\n", code.trim()),
                map: None,
                module_type: Some(ModuleType::JavaScript),
            }))
        }
    }

    #[tokio::test]
    async fn content_hook_can_rewrite_the_declared_type() {
        let dir = TempDir::new().unwrap();
        let answer = write(dir.path(), "answer.data", "42\n");

        let result = processor(dir.path(), vec![Arc::new(DataFiles)])
            .transform(&answer)
            .await
            .unwrap();

        assert!(result.code.contains("export default 42;"));
    }

    struct MagicResolver {
        target: PathBuf,
    }

    #[async_trait]
    impl Plugin for MagicResolver {
        fn name(&self) -> &str {
            "test:magic-resolver"
        }

        fn hooks(&self) -> HookSet {
            HookSet {
                resolve: true,
                ..HookSet::default()
            }
        }

        async fn resolve(&self, specifier: &str, _importer: &Path) -> Result<Option<PathBuf>> {
            Ok((specifier == "magic").then(|| self.target.clone()))
        }
    }

    #[tokio::test]
    async fn plugin_resolve_hook_wins_over_the_resolver() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("generated/magic.js");
        let main = write(dir.path(), "main.js", "import magic from 'magic';\n");

        let result = processor(
            dir.path(),
            vec![Arc::new(MagicResolver {
                target: target.clone(),
            })],
        )
        .transform(&main)
        .await
        .unwrap();

        let url = ServerOptions::new(dir.path()).address.module_url(&target);
        assert!(result.code.contains(&url));
        assert_eq!(result.imports, vec![target]);
    }
}
