//! First pass over a parsed module: collect every specifier that needs
//! resolution, and detect hot-reload API usage.
//!
//! Routed (`virtual:`) and external (URL) specifiers never reach the
//! resolver, so they are filtered out here; the rewriter handles them
//! structurally in the second pass.

use oxc_ast::ast::{
    Argument, CallExpression, ExportAllDeclaration, ExportNamedDeclaration, Expression,
    ImportDeclaration, ImportExpression, Program, StaticMemberExpression,
};
use oxc_ast_visit::{walk, Visit};
use rustc_hash::FxHashSet;

use flint_resolver::{classify, Resolution};

/// Marker call that CommonJS-interop transforms emit to defer specifier
/// resolution to the server. The call is replaced by the resolved URL as a
/// plain string literal.
pub const RESOLVE_MARKER: &str = "__flint_resolve__";

/// Specifiers starting with this prefix address server routes (`/@module`,
/// `/@client.js`, ...) and are never filesystem lookups.
pub(crate) const INTERNAL_ROUTE_PREFIX: &str = "/@";

/// What one pass over the program found.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Specifiers needing resolution, deduplicated, in first-seen order.
    pub specifiers: Vec<String>,
    /// The module reads `import.meta.hot` somewhere.
    pub uses_hot: bool,
    /// The module calls `import.meta.hot.accept(...)`.
    pub hot_accepting: bool,
}

#[derive(Default)]
pub struct ImportScan {
    specifiers: Vec<String>,
    seen: FxHashSet<String>,
    uses_hot: bool,
    hot_accepting: bool,
}

impl ImportScan {
    pub fn scan(program: &Program<'_>) -> ScanOutcome {
        let mut scanner = ImportScan::default();
        walk::walk_program(&mut scanner, program);
        ScanOutcome {
            specifiers: scanner.specifiers,
            uses_hot: scanner.uses_hot,
            hot_accepting: scanner.hot_accepting,
        }
    }

    fn record(&mut self, specifier: &str) {
        if matches!(
            classify(specifier),
            Resolution::Routed(_) | Resolution::External
        ) || specifier.starts_with(INTERNAL_ROUTE_PREFIX)
        {
            return;
        }
        if self.seen.insert(specifier.to_string()) {
            self.specifiers.push(specifier.to_string());
        }
    }
}

/// `import.meta`
pub(crate) fn is_import_meta(expr: &Expression<'_>) -> bool {
    matches!(
        expr,
        Expression::MetaProperty(meta)
            if meta.meta.name == "import" && meta.property.name == "meta"
    )
}

/// `import.meta.hot`
pub(crate) fn is_import_meta_hot(expr: &Expression<'_>) -> bool {
    matches!(
        expr,
        Expression::StaticMemberExpression(member)
            if member.property.name == "hot" && is_import_meta(&member.object)
    )
}

impl<'a> Visit<'a> for ImportScan {
    fn visit_import_declaration(&mut self, decl: &ImportDeclaration<'a>) {
        self.record(decl.source.value.as_str());
        walk::walk_import_declaration(self, decl);
    }

    fn visit_export_named_declaration(&mut self, decl: &ExportNamedDeclaration<'a>) {
        if let Some(source) = &decl.source {
            self.record(source.value.as_str());
        }
        walk::walk_export_named_declaration(self, decl);
    }

    fn visit_export_all_declaration(&mut self, decl: &ExportAllDeclaration<'a>) {
        self.record(decl.source.value.as_str());
        walk::walk_export_all_declaration(self, decl);
    }

    fn visit_import_expression(&mut self, expr: &ImportExpression<'a>) {
        if let Expression::StringLiteral(lit) = &expr.source {
            self.record(lit.value.as_str());
        }
        walk::walk_import_expression(self, expr);
    }

    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        match &call.callee {
            Expression::Identifier(ident) if ident.name == RESOLVE_MARKER => {
                if let Some(Argument::StringLiteral(lit)) = call.arguments.first() {
                    self.record(lit.value.as_str());
                }
            }
            Expression::StaticMemberExpression(member)
                if member.property.name == "accept" && is_import_meta_hot(&member.object) =>
            {
                self.hot_accepting = true;
            }
            _ => {}
        }
        walk::walk_call_expression(self, call);
    }

    fn visit_static_member_expression(&mut self, member: &StaticMemberExpression<'a>) {
        if member.property.name == "hot" && is_import_meta(&member.object) {
            self.uses_hot = true;
        }
        walk::walk_static_member_expression(self, member);
    }
}
