//! Scope-aware static checks over a parsed binding.
//!
//! The walk mirrors the evaluator's scoping: every block, function body,
//! `for` header and `catch` clause opens a scope, and declarations are
//! collected before the statements of their block are visited so that a
//! closure may refer to a name declared further down. `var` declarations
//! belong to the enclosing function wherever they appear.

use std::collections::HashMap;
use tracing::trace;

use crate::ast::{
    self, DeclKind, Expr, FunctionBody, FunctionDef, MemberProp, ObjectEntry, PropKey, Stmt,
    TemplatePart, UnaryOp,
};
use crate::diagnostics::{Diagnostic, Severity};
use crate::lexer::Pos;
use crate::stack::ensure_sufficient_stack;
use crate::template::ParsedSource;

pub const UNDEFINED_NAME: &str = "W117";
pub const CONST_REASSIGN: &str = "E013";
pub const REDECLARED: &str = "W004";
pub const SYNTAX: &str = "E000";

/// Check `source` and return its static diagnostics in source order.
///
/// `known` answers whether a name resolves outside the binding: globals,
/// library helpers, context entities and template locals.
pub fn lint(source: &ParsedSource, known: &dyn Fn(&str) -> bool) -> Vec<Diagnostic> {
    let program = match &source.program {
        Ok(program) => program,
        Err(err) => {
            return vec![Diagnostic::lint(
                source,
                SYNTAX,
                Severity::Error,
                err.message.clone(),
                err.pos,
                None,
            )]
        }
    };
    let mut linter = Linter {
        source,
        known,
        scopes: Vec::new(),
        out: Vec::new(),
    };
    linter.scopes.push(HashMap::new());
    linter.hoist_vars(&program.body, &[]);
    linter.statements(&program.body);
    trace!(findings = linter.out.len(), "lint finished");
    linter.out
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Binding {
    Constant,
    Mutable,
}

struct Linter<'s> {
    source: &'s ParsedSource,
    known: &'s dyn Fn(&str) -> bool,
    scopes: Vec<HashMap<String, Binding>>,
    out: Vec<Diagnostic>,
}

impl Linter<'_> {
    fn report(&mut self, code: &str, severity: Severity, message: String, pos: Pos, name: &str) {
        self.out.push(Diagnostic::lint(
            self.source,
            code,
            severity,
            message,
            pos,
            Some(name),
        ));
    }

    fn declare(&mut self, name: &str, binding: Binding, pos: Pos) {
        let Some(scope) = self.scopes.last_mut() else {
            return;
        };
        if scope.insert(name.to_string(), binding).is_some() {
            self.report(
                REDECLARED,
                Severity::Warning,
                format!("'{name}' is already defined."),
                pos,
                name,
            );
        }
    }

    fn resolve(&self, name: &str) -> Option<Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn read(&mut self, name: &str, pos: Pos) {
        if self.resolve(name).is_none() && !(self.known)(name) {
            self.report(
                UNDEFINED_NAME,
                Severity::Error,
                format!("'{name}' is not defined."),
                pos,
                name,
            );
        }
    }

    fn write(&mut self, name: &str, pos: Pos) {
        match self.resolve(name) {
            Some(Binding::Constant) => self.report(
                CONST_REASSIGN,
                Severity::Error,
                format!("Attempting to override '{name}' which is a constant."),
                pos,
                name,
            ),
            Some(Binding::Mutable) => {}
            None => self.read(name, pos),
        }
    }

    /// Declare the `var`s of a function body in the current scope. A `var`
    /// repeating a parameter name is the parameter.
    fn hoist_vars(&mut self, stmts: &[Stmt], params: &[ast::Param]) {
        for (name, pos) in ast::var_declarations(stmts) {
            if !params.iter().any(|p| p.name == name) {
                self.declare(name, Binding::Mutable, pos);
            }
        }
    }

    /// Visit `stmts` in a fresh scope.
    fn block(&mut self, stmts: &[Stmt]) {
        self.scopes.push(HashMap::new());
        self.statements(stmts);
        self.scopes.pop();
    }

    /// Visit `stmts` in the current scope, declarations first.
    fn statements(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.collect(stmt);
        }
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn collect(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Decl { kind, decls } if *kind != DeclKind::Var => {
                let binding = match kind {
                    DeclKind::Const => Binding::Constant,
                    _ => Binding::Mutable,
                };
                for decl in decls {
                    self.declare(&decl.name, binding, decl.pos);
                }
            }
            Stmt::Function(def) => {
                if let Some(name) = &def.name {
                    self.declare(name, Binding::Mutable, def.pos);
                }
            }
            _ => {}
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        ensure_sufficient_stack(|| self.visit_stmt(stmt))
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(e) | Stmt::Throw(e) => self.expr(e),
            Stmt::Decl { decls, .. } => {
                for decl in decls {
                    if let Some(init) = &decl.init {
                        self.expr(init);
                    }
                }
            }
            Stmt::Function(def) => self.function(def),
            Stmt::Return(e) => {
                if let Some(e) = e {
                    self.expr(e);
                }
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                self.expr(test);
                self.nested(consequent);
                if let Some(alternate) = alternate {
                    self.nested(alternate);
                }
            }
            Stmt::Block(stmts) => self.block(stmts),
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                self.scopes.push(HashMap::new());
                if let Some(init) = init {
                    self.collect(init);
                    self.stmt(init);
                }
                if let Some(test) = test {
                    self.expr(test);
                }
                if let Some(update) = update {
                    self.expr(update);
                }
                self.nested(body);
                self.scopes.pop();
            }
            Stmt::ForOf {
                kind,
                name,
                pos,
                iterable,
                body,
            } => {
                self.expr(iterable);
                self.scopes.push(HashMap::new());
                match kind {
                    DeclKind::Const => self.declare(name, Binding::Constant, *pos),
                    DeclKind::Let => self.declare(name, Binding::Mutable, *pos),
                    DeclKind::Var => self.write(name, *pos),
                }
                self.nested(body);
                self.scopes.pop();
            }
            Stmt::While { test, body } => {
                self.expr(test);
                self.nested(body);
            }
            Stmt::Try {
                block,
                param,
                handler,
                finalizer,
            } => {
                self.block(block);
                if let Some(handler) = handler {
                    self.scopes.push(HashMap::new());
                    if let Some((name, pos)) = param {
                        self.declare(name, Binding::Mutable, *pos);
                    }
                    self.block(handler);
                    self.scopes.pop();
                }
                if let Some(finalizer) = finalizer {
                    self.block(finalizer);
                }
            }
            Stmt::Break | Stmt::Continue | Stmt::Empty => {}
        }
    }

    /// A statement in a position that takes a single statement (loop and
    /// branch bodies); a declaration there still gets its own scope.
    fn nested(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block(stmts) => self.block(stmts),
            other => self.block(std::slice::from_ref(other)),
        }
    }

    fn function(&mut self, def: &FunctionDef) {
        self.scopes.push(HashMap::new());
        for param in &def.params {
            self.declare(&param.name, Binding::Mutable, param.pos);
        }
        for param in &def.params {
            if let Some(default) = &param.default {
                self.expr(default);
            }
        }
        match &def.body {
            FunctionBody::Expr(e) => self.expr(e),
            FunctionBody::Block(stmts) => {
                self.hoist_vars(stmts, &def.params);
                self.statements(stmts);
            }
        }
        self.scopes.pop();
    }

    fn expr(&mut self, expr: &Expr) {
        ensure_sufficient_stack(|| self.visit_expr(expr))
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Number(_) | Expr::Str(_) | Expr::Bool(_) | Expr::Null | Expr::This => {}
            Expr::Ident { name, pos } => self.read(name, *pos),
            Expr::Template(parts) => {
                for part in parts {
                    if let TemplatePart::Expr(e) = part {
                        self.expr(e);
                    }
                }
            }
            Expr::Array(items) => {
                for item in items {
                    self.expr(item);
                }
            }
            Expr::Object(entries) => {
                for entry in entries {
                    match entry {
                        ObjectEntry::Prop(key, value) => {
                            if let PropKey::Computed(key) = key {
                                self.expr(key);
                            }
                            self.expr(value);
                        }
                        ObjectEntry::Spread(e) => self.expr(e),
                    }
                }
            }
            Expr::Unary {
                op: UnaryOp::Typeof,
                arg,
            } if matches!(**arg, Expr::Ident { .. }) => {}
            Expr::Spread(e) | Expr::Unary { arg: e, .. } | Expr::Await(e) => self.expr(e),
            Expr::Member {
                object, property, ..
            } => {
                self.expr(object);
                if let MemberProp::Computed(key) = property {
                    self.expr(key);
                }
            }
            Expr::Call { callee, args, .. } | Expr::New { callee, args, .. } => {
                self.expr(callee);
                for arg in args {
                    self.expr(arg);
                }
            }
            Expr::Update { target, .. } => self.target(target),
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.expr(test);
                self.expr(consequent);
                self.expr(alternate);
            }
            Expr::Assign { target, value, .. } => {
                self.target(target);
                self.expr(value);
            }
            Expr::Function(def) => {
                // A named function expression sees its own name.
                self.scopes.push(HashMap::new());
                if let (Some(name), false) = (&def.name, def.is_arrow) {
                    self.declare(name, Binding::Mutable, def.pos);
                }
                self.function(def);
                self.scopes.pop();
            }
        }
    }

    fn target(&mut self, target: &Expr) {
        match target {
            Expr::Ident { name, pos } => self.write(name, *pos),
            other => self.expr(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::LintDiagnostic;
    use crate::template::ScriptKind;
    use pretty_assertions::assert_eq;

    fn known(name: &str) -> bool {
        matches!(name, "THIS_CONTEXT" | "ARGUMENTS" | "Math" | "console" | "data")
    }

    fn run(binding: &str) -> Vec<LintDiagnostic> {
        let source = ParsedSource::new(ScriptKind::Sync, binding, false);
        lint(&source, &known)
            .into_iter()
            .map(|d| match d {
                Diagnostic::Lint(d) => d,
                Diagnostic::Parse(d) => panic!("unexpected runtime diagnostic {d:?}"),
            })
            .collect()
    }

    #[test]
    fn clean_binding_has_no_findings() {
        assert_eq!(run("Math.max(data.a, 2)"), vec![]);
        assert_eq!(run("[1, 2].map(x => x * 2)"), vec![]);
    }

    #[test]
    fn undefined_identifier() {
        let found = run("wrongJS");
        assert_eq!(found.len(), 1);
        let d = &found[0];
        assert_eq!(d.code, "W117");
        assert_eq!(d.error_message, "'wrongJS' is not defined.");
        assert_eq!((d.line, d.ch), (1, 1));
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.error_segment, "    const result = wrongJS");
        assert_eq!(d.variables, [Some("wrongJS".to_string()), None, None, None]);
    }

    #[test]
    fn position_on_a_later_line() {
        let found = run("(() => {\n  return missing + 1\n})()");
        assert_eq!(found.len(), 1);
        assert_eq!((found[0].line, found[0].ch), (2, 10));
        assert_eq!(found[0].error_segment, "  return missing + 1");
    }

    #[test]
    fn typeof_is_exempt() {
        assert_eq!(run("typeof nothing === 'undefined'"), vec![]);
    }

    #[test]
    fn later_declarations_resolve_inside_closures() {
        let src = "(() => { const f = () => g(); function g() { return 1 } return f() })()";
        assert_eq!(run(src), vec![]);
    }

    #[test]
    fn constant_reassignment() {
        let found = run("(() => { const a = 1; a = 2; return a })()");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].code, "E013");
        assert_eq!(
            found[0].error_message,
            "Attempting to override 'a' which is a constant."
        );
    }

    #[test]
    fn redeclaration_is_a_warning() {
        let found = run("(() => { let a = 1; let a = 2; return a })()");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].code, "W004");
        assert_eq!(found[0].severity, Severity::Warning);
    }

    #[test]
    fn block_scopes_do_not_leak() {
        let found = run("(() => { if (true) { const inner = 1 } return inner })()");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].error_message, "'inner' is not defined.");
    }

    #[test]
    fn var_belongs_to_the_enclosing_function() {
        assert_eq!(run("(() => { if (true) { var a = 1 } return a })()"), vec![]);
        assert_eq!(run("(() => { for (var i = 0; i < 2; i++) {} return i })()"), vec![]);
        assert_eq!(run("(function (a) { var a; return a })(1)"), vec![]);

        let found = run("(() => { (() => { var inner = 1 })(); return inner })()");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].error_message, "'inner' is not defined.");

        let found = run("(() => { var a = 1; if (a) { var a = 2 } return a })()");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].code, "W004");
    }

    #[test]
    fn named_function_expression_sees_itself() {
        let src = "(function fact(n) { return n <= 1 ? 1 : n * fact(n - 1) })(5)";
        assert_eq!(run(src), vec![]);
    }

    #[test]
    fn deeply_nested_binding_is_walked() {
        let src = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert_eq!(run(&src), vec![]);
    }

    #[test]
    fn catch_params_and_loop_variables() {
        let src = "(() => { try { for (const x of [1]) { x } } catch (e) { return e } })()";
        assert_eq!(run(src), vec![]);
    }

    #[test]
    fn syntax_error_is_e000() {
        let source = ParsedSource::new(ScriptKind::Sync, "(1 +", false);
        let found = lint(&source, &known);
        assert_eq!(found.len(), 1);
        let Diagnostic::Lint(d) = &found[0] else {
            panic!("expected lint");
        };
        assert_eq!(d.code, "E000");
        assert_eq!(d.variables, [None, None, None, None]);
    }
}
