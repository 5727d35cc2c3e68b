//! Second pass over a parsed module: rewrite every import specifier to a
//! request URL, wrap dynamic imports in the runtime interop helper, and
//! wire up the hot-reload handle.
//!
//! The pass mutates the program in place and runs only after every
//! specifier resolution has settled, so emitted code is never partially
//! rewritten.

use std::mem;
use std::path::{Path, PathBuf};

use oxc_allocator::{Allocator, TakeIn};
use oxc_ast::ast::{
    Argument, ExportAllDeclaration, ExportNamedDeclaration, Expression, ImportDeclaration,
    ImportExpression, Program, Statement, StringLiteral,
};
use oxc_ast::AstBuilder;
use oxc_ast_visit::{walk_mut, VisitMut};
use oxc_parser::Parser;
use oxc_span::{SourceType, SPAN};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

use flint_config::ServerAddr;
use flint_resolver::{classify, Resolution};

use crate::scan::{INTERNAL_ROUTE_PREFIX, RESOLVE_MARKER};

/// Runtime helper that performs a dynamic import, resolving specifiers
/// that were not statically rewritable through the server first.
pub const IMPORT_HELPER_FN: &str = "__flint_import__";

/// Runtime helper that returns the hot-reload handle for a module path.
pub const HOT_HELPER_FN: &str = "__flint_hot__";

/// Route serving the browser runtime that defines both helpers.
pub const CLIENT_MODULE_PATH: &str = "/@client.js";

/// What the rewrite pass changed.
#[derive(Debug, Default)]
pub struct RewriteOutcome {
    /// Absolute paths of every successfully resolved import, in first-use
    /// order, without duplicates.
    pub imports: Vec<PathBuf>,
    /// At least one specifier had no resolution and now points at the
    /// unresolved stub endpoint.
    pub had_unresolved: bool,
}

/// Rewrite `program` in place against the settled `resolutions` table.
///
/// `uses_hot` comes from the scan pass; when set, the hot-reload handle
/// assignment is injected ahead of the module body.
pub fn rewrite_program<'a>(
    allocator: &'a Allocator,
    program: &mut Program<'a>,
    importer: &Path,
    addr: &ServerAddr,
    resolutions: &FxHashMap<String, Option<PathBuf>>,
    uses_hot: bool,
) -> RewriteOutcome {
    let mut rewriter = Rewriter {
        ast: AstBuilder::new(allocator),
        resolutions,
        addr,
        importer,
        imports: Vec::new(),
        imports_seen: FxHashSet::default(),
        had_unresolved: false,
        saw_client_helper: false,
        rewrote_dynamic: false,
    };
    walk_mut::walk_program(&mut rewriter, program);
    rewriter.inject_preamble(program, uses_hot);
    RewriteOutcome {
        imports: rewriter.imports,
        had_unresolved: rewriter.had_unresolved,
    }
}

struct Rewriter<'a, 'r> {
    ast: AstBuilder<'a>,
    resolutions: &'r FxHashMap<String, Option<PathBuf>>,
    addr: &'r ServerAddr,
    importer: &'r Path,
    imports: Vec<PathBuf>,
    imports_seen: FxHashSet<PathBuf>,
    had_unresolved: bool,
    saw_client_helper: bool,
    rewrote_dynamic: bool,
}

impl<'a> Rewriter<'a, '_> {
    /// Replacement text for a specifier, or `None` to leave it untouched.
    fn target_for(&mut self, specifier: &str) -> Option<String> {
        match classify(specifier) {
            Resolution::External => None,
            Resolution::Routed(rest) => Some(rest.to_string()),
            _ if specifier.starts_with(INTERNAL_ROUTE_PREFIX) => None,
            _ => match self.resolutions.get(specifier) {
                Some(Some(path)) => {
                    if self.imports_seen.insert(path.clone()) {
                        self.imports.push(path.clone());
                    }
                    Some(self.addr.module_url(path))
                }
                _ => {
                    self.had_unresolved = true;
                    Some(self.addr.unresolved_url(specifier, self.importer))
                }
            },
        }
    }

    fn rewrite_specifier_literal(&mut self, lit: &mut StringLiteral<'a>) {
        let value = lit.value.as_str();
        if let Some(target) = self.target_for(value) {
            lit.value = self.ast.atom(&target);
            lit.raw = None;
        }
    }

    fn string_expression(&self, value: &str) -> Expression<'a> {
        let lit = self.ast.string_literal(SPAN, self.ast.atom(value), None);
        Expression::StringLiteral(self.ast.alloc(lit))
    }

    /// Parse a generated snippet into the module's arena. Snippets are
    /// fixed templates with JSON-escaped interpolations, so a parse
    /// failure means a template bug, not bad user input.
    fn parse_statements(&self, text: &str) -> Option<oxc_allocator::Vec<'a, Statement<'a>>> {
        let source: &'a str = self.ast.allocator.alloc_str(text);
        let parsed = Parser::new(self.ast.allocator, source, SourceType::mjs()).parse();
        if !parsed.errors.is_empty() {
            return None;
        }
        Some(parsed.program.body)
    }

    fn parse_expression(&self, text: &str) -> Option<Expression<'a>> {
        let mut body = self.parse_statements(text)?;
        match body.pop() {
            Some(Statement::ExpressionStatement(stmt)) => Some(stmt.unbox().expression),
            _ => None,
        }
    }

    /// Replace `import(<source>)` with `__flint_import__(<source>, <importer>)`.
    ///
    /// The importer path rides along so the runtime helper can ask the
    /// resolve endpoint about specifiers that only exist at runtime. An
    /// options argument (import attributes) is forwarded as a third
    /// argument, never dropped.
    fn wrap_dynamic_import(&mut self, expr: &mut Expression<'a>) {
        let importer = serde_json::Value::String(self.importer.to_string_lossy().into_owned());
        let has_options = matches!(
            &*expr,
            Expression::ImportExpression(import) if import.options.is_some()
        );
        let template = if has_options {
            format!("{IMPORT_HELPER_FN}(0, {importer}, 0)")
        } else {
            format!("{IMPORT_HELPER_FN}(0, {importer})")
        };
        let Some(Expression::CallExpression(mut call)) = self.parse_expression(&template) else {
            warn!(
                importer = %self.importer.display(),
                "import helper template failed to parse; dynamic import left as-is"
            );
            return;
        };
        let source_slot_missing = call
            .arguments
            .first_mut()
            .and_then(|arg| arg.as_expression_mut())
            .is_none();
        let options_slot_missing = has_options
            && call
                .arguments
                .get_mut(2)
                .and_then(|arg| arg.as_expression_mut())
                .is_none();
        if source_slot_missing || options_slot_missing {
            return;
        }
        let taken = expr.take_in(self.ast);
        let (source, options) = match taken {
            Expression::ImportExpression(import) => {
                let unboxed = import.unbox();
                (unboxed.source, unboxed.options)
            }
            other => {
                *expr = other;
                return;
            }
        };
        if let Some(slot) = call
            .arguments
            .first_mut()
            .and_then(|arg| arg.as_expression_mut())
        {
            *slot = source;
        }
        if let Some(options) = options {
            if let Some(slot) = call
                .arguments
                .get_mut(2)
                .and_then(|arg| arg.as_expression_mut())
            {
                *slot = options;
            }
        }
        *expr = Expression::CallExpression(call);
        self.rewrote_dynamic = true;
    }

    /// Prepend the helper import and hot-handle wiring where needed.
    fn inject_preamble(&mut self, program: &mut Program<'a>, uses_hot: bool) {
        let mut preamble = String::new();
        if (uses_hot || self.rewrote_dynamic) && !self.saw_client_helper {
            let mut names = Vec::new();
            if uses_hot {
                names.push(HOT_HELPER_FN);
            }
            if self.rewrote_dynamic {
                names.push(IMPORT_HELPER_FN);
            }
            preamble.push_str(&format!(
                "import {{ {} }} from \"{CLIENT_MODULE_PATH}\";\n",
                names.join(", ")
            ));
        }
        if uses_hot {
            // Module id is the file's own path, not a URL, so hot wiring
            // never bakes the server origin into the artifact.
            let id = serde_json::Value::String(self.importer.to_string_lossy().into_owned());
            preamble.push_str(&format!("import.meta.hot = {HOT_HELPER_FN}({id});\n"));
        }
        if preamble.is_empty() {
            return;
        }
        match self.parse_statements(&preamble) {
            Some(injected) if !injected.is_empty() => {
                let original = mem::replace(&mut program.body, self.ast.vec());
                program.body = self.ast.vec_from_iter(injected.into_iter().chain(original));
            }
            _ => warn!(
                importer = %self.importer.display(),
                "module preamble failed to parse; hot wiring skipped"
            ),
        }
    }
}

impl<'a> VisitMut<'a> for Rewriter<'a, '_> {
    fn visit_import_declaration(&mut self, decl: &mut ImportDeclaration<'a>) {
        self.rewrite_specifier_literal(&mut decl.source);
        if decl.source.value == CLIENT_MODULE_PATH {
            self.saw_client_helper = true;
        }
        walk_mut::walk_import_declaration(self, decl);
    }

    fn visit_export_named_declaration(&mut self, decl: &mut ExportNamedDeclaration<'a>) {
        if let Some(source) = &mut decl.source {
            self.rewrite_specifier_literal(source);
        }
        walk_mut::walk_export_named_declaration(self, decl);
    }

    fn visit_export_all_declaration(&mut self, decl: &mut ExportAllDeclaration<'a>) {
        self.rewrite_specifier_literal(&mut decl.source);
        walk_mut::walk_export_all_declaration(self, decl);
    }

    fn visit_import_expression(&mut self, expr: &mut ImportExpression<'a>) {
        if let Expression::StringLiteral(lit) = &mut expr.source {
            self.rewrite_specifier_literal(lit);
        }
        walk_mut::walk_import_expression(self, expr);
    }

    fn visit_expression(&mut self, expr: &mut Expression<'a>) {
        // Children first, so nested imports inside arguments settle before
        // this node is replaced.
        walk_mut::walk_expression(self, expr);

        if matches!(expr, Expression::ImportExpression(_)) {
            self.wrap_dynamic_import(expr);
            return;
        }

        let marker_arg = match expr {
            Expression::CallExpression(call)
                if matches!(
                    &call.callee,
                    Expression::Identifier(ident) if ident.name == RESOLVE_MARKER
                ) =>
            {
                match call.arguments.first() {
                    Some(Argument::StringLiteral(lit)) => Some(lit.value.as_str()),
                    _ => None,
                }
            }
            _ => None,
        };
        if let Some(specifier) = marker_arg {
            let replacement = self
                .target_for(specifier)
                .unwrap_or_else(|| specifier.to_string());
            *expr = self.string_expression(&replacement);
        }
    }
}
