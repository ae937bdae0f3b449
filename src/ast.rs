// src/ast.rs
use std::rc::Rc;

use crate::lexer::Pos;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    Typeof,
    Void,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    In,
    Instanceof,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

/// `=` carries no operator; compound assignments carry theirs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Compound(BinaryOp),
}

#[derive(Clone, Debug, PartialEq)]
pub enum MemberProp {
    Named(String),
    Computed(Box<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum PropKey {
    Named(String),
    Computed(Expr),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ObjectEntry {
    Prop(PropKey, Expr),
    Spread(Expr),
}

#[derive(Clone, Debug, PartialEq)]
pub enum TemplatePart {
    Text(String),
    Expr(Expr),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Template(Vec<TemplatePart>),
    Bool(bool),
    Null,
    This,
    Ident {
        name: String,
        pos: Pos,
    },
    Array(Vec<Expr>),
    Object(Vec<ObjectEntry>),
    /// Only valid inside array literals and argument lists.
    Spread(Box<Expr>),
    Member {
        object: Box<Expr>,
        property: MemberProp,
        optional: bool,
        pos: Pos,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        optional: bool,
        pos: Pos,
    },
    New {
        callee: Box<Expr>,
        args: Vec<Expr>,
        pos: Pos,
    },
    Unary {
        op: UnaryOp,
        arg: Box<Expr>,
    },
    Update {
        increment: bool,
        prefix: bool,
        target: Box<Expr>,
        pos: Pos,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
        pos: Pos,
    },
    Function(Rc<FunctionDef>),
    Await(Box<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: String,
    pub pos: Pos,
    pub default: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FunctionBody {
    Expr(Box<Expr>),
    Block(Vec<Stmt>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub body: FunctionBody,
    pub is_async: bool,
    pub is_arrow: bool,
    pub pos: Pos,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeclKind {
    Var,
    Let,
    Const,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Declarator {
    pub name: String,
    pub pos: Pos,
    pub init: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Decl {
        kind: DeclKind,
        decls: Vec<Declarator>,
    },
    Function(Rc<FunctionDef>),
    Return(Option<Expr>),
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
    },
    Block(Vec<Stmt>),
    For {
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    ForOf {
        kind: DeclKind,
        name: String,
        pos: Pos,
        iterable: Expr,
        body: Box<Stmt>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    Break,
    Continue,
    Throw(Expr),
    Try {
        block: Vec<Stmt>,
        param: Option<(String, Pos)>,
        handler: Option<Vec<Stmt>>,
        finalizer: Option<Vec<Stmt>>,
    },
    Empty,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

impl Expr {
    /// Source-like rendering of a callee, used in `... is not a function` messages.
    pub fn callee_text(&self) -> String {
        match self {
            Expr::Ident { name, .. } => name.clone(),
            Expr::This => "this".into(),
            Expr::Member {
                object, property, ..
            } => match property {
                MemberProp::Named(p) => format!("{}.{}", object.callee_text(), p),
                MemberProp::Computed(_) => format!("{}[...]", object.callee_text()),
            },
            Expr::Call { callee, .. } => format!("{}(...)", callee.callee_text()),
            _ => "expression".into(),
        }
    }
}

impl Expr {
    /// Whether `pred` holds for this expression or any expression nested in
    /// it, function bodies included.
    pub fn any(&self, pred: &dyn Fn(&Expr) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        match self {
            Expr::Number(_)
            | Expr::Str(_)
            | Expr::Bool(_)
            | Expr::Null
            | Expr::This
            | Expr::Ident { .. } => false,
            Expr::Template(parts) => parts.iter().any(|part| match part {
                TemplatePart::Text(_) => false,
                TemplatePart::Expr(e) => e.any(pred),
            }),
            Expr::Array(items) => items.iter().any(|e| e.any(pred)),
            Expr::Object(entries) => entries.iter().any(|entry| match entry {
                ObjectEntry::Prop(PropKey::Named(_), value) => value.any(pred),
                ObjectEntry::Prop(PropKey::Computed(key), value) => {
                    key.any(pred) || value.any(pred)
                }
                ObjectEntry::Spread(e) => e.any(pred),
            }),
            Expr::Spread(e) | Expr::Unary { arg: e, .. } | Expr::Await(e) => e.any(pred),
            Expr::Update { target, .. } => target.any(pred),
            Expr::Member {
                object, property, ..
            } => {
                object.any(pred)
                    || matches!(property, MemberProp::Computed(key) if key.any(pred))
            }
            Expr::Call { callee, args, .. } | Expr::New { callee, args, .. } => {
                callee.any(pred) || args.iter().any(|e| e.any(pred))
            }
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                left.any(pred) || right.any(pred)
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => test.any(pred) || consequent.any(pred) || alternate.any(pred),
            Expr::Assign { target, value, .. } => target.any(pred) || value.any(pred),
            Expr::Function(def) => {
                def.params
                    .iter()
                    .any(|p| p.default.as_ref().is_some_and(|d| d.any(pred)))
                    || match &def.body {
                        FunctionBody::Expr(e) => e.any(pred),
                        FunctionBody::Block(stmts) => stmts.iter().any(|s| s.any_expr(pred)),
                    }
            }
        }
    }
}

impl Stmt {
    /// [`Expr::any`] over every expression in this statement.
    pub fn any_expr(&self, pred: &dyn Fn(&Expr) -> bool) -> bool {
        let block = |stmts: &[Stmt]| stmts.iter().any(|s| s.any_expr(pred));
        match self {
            Stmt::Expr(e) | Stmt::Throw(e) => e.any(pred),
            Stmt::Decl { decls, .. } => decls
                .iter()
                .any(|d| d.init.as_ref().is_some_and(|e| e.any(pred))),
            Stmt::Function(def) => Expr::Function(def.clone()).any(pred),
            Stmt::Return(e) => e.as_ref().is_some_and(|e| e.any(pred)),
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                test.any(pred)
                    || consequent.any_expr(pred)
                    || alternate.as_ref().is_some_and(|s| s.any_expr(pred))
            }
            Stmt::Block(stmts) => block(stmts),
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                init.as_ref().is_some_and(|s| s.any_expr(pred))
                    || test.as_ref().is_some_and(|e| e.any(pred))
                    || update.as_ref().is_some_and(|e| e.any(pred))
                    || body.any_expr(pred)
            }
            Stmt::ForOf { iterable, body, .. } => iterable.any(pred) || body.any_expr(pred),
            Stmt::While { test, body } => test.any(pred) || body.any_expr(pred),
            Stmt::Try {
                block: tried,
                handler,
                finalizer,
                ..
            } => {
                block(tried)
                    || handler.as_deref().is_some_and(block)
                    || finalizer.as_deref().is_some_and(block)
            }
            Stmt::Break | Stmt::Continue | Stmt::Empty => false,
        }
    }
}

/// `var` declarations in `stmts`, nested blocks and loops included but not
/// nested functions, in source order.
pub fn var_declarations(stmts: &[Stmt]) -> Vec<(&str, Pos)> {
    let mut out = Vec::new();
    for stmt in stmts {
        stmt.collect_vars(&mut out);
    }
    out
}

impl Stmt {
    fn collect_vars<'a>(&'a self, out: &mut Vec<(&'a str, Pos)>) {
        match self {
            Stmt::Decl {
                kind: DeclKind::Var,
                decls,
            } => out.extend(decls.iter().map(|d| (d.name.as_str(), d.pos))),
            Stmt::If {
                consequent,
                alternate,
                ..
            } => {
                consequent.collect_vars(out);
                if let Some(alternate) = alternate {
                    alternate.collect_vars(out);
                }
            }
            Stmt::Block(stmts) => stmts.iter().for_each(|s| s.collect_vars(out)),
            Stmt::For { init, body, .. } => {
                if let Some(init) = init {
                    init.collect_vars(out);
                }
                body.collect_vars(out);
            }
            Stmt::ForOf {
                kind, name, pos, body, ..
            } => {
                if *kind == DeclKind::Var {
                    out.push((name.as_str(), *pos));
                }
                body.collect_vars(out);
            }
            Stmt::While { body, .. } => body.collect_vars(out),
            Stmt::Try {
                block,
                handler,
                finalizer,
                ..
            } => {
                for stmts in [Some(block), handler.as_ref(), finalizer.as_ref()]
                    .into_iter()
                    .flatten()
                {
                    stmts.iter().for_each(|s| s.collect_vars(out));
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::{parse_expression, parse_program};

    #[test]
    fn any_reaches_into_function_bodies() {
        let expr = parse_expression("xs.map(x => { if (x) { return y.then(f) } })").unwrap();
        let is_y = |e: &crate::ast::Expr| matches!(e, crate::ast::Expr::Ident { name, .. } if name == "y");
        assert!(expr.any(&is_y));
        let is_z = |e: &crate::ast::Expr| matches!(e, crate::ast::Expr::Ident { name, .. } if name == "z");
        assert!(!expr.any(&is_z));
    }

    #[test]
    fn var_declarations_skip_nested_functions() {
        let program = parse_program(
            "var a = 1; if (x) { var b } for (var i = 0; i < 1; i++) {} function f() { var hidden }",
        )
        .unwrap();
        let names: Vec<&str> = super::var_declarations(&program.body)
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["a", "b", "i"]);
    }
}
