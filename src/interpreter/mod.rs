//! Tree-walking evaluator for parsed bindings.

pub mod builtins;
pub mod promise;
pub mod scope;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

use crate::ast::{
    self, AssignOp, BinaryOp, DeclKind, Expr, FunctionBody, FunctionDef, LogicalOp, MemberProp,
    ObjectEntry, Program, PropKey, Stmt, TemplatePart, UnaryOp,
};
use crate::comparison::{cmp_values, loose_equals, strict_equals, to_primitive};
use crate::context::{DataTree, EvalConfig, ExecutionMode};
use crate::environment::Environment;
use crate::errors::SandboxError;
use crate::functions::{Function, Registry};
use crate::stack::ensure_sufficient_stack;
use crate::triggers::{TriggerCall, TriggerDispatcher, TriggerSpec};
use crate::value::{self, Callable, JsObject, JsResult, JsValue, ObjectKind, Thrown};

use promise::Job;
use scope::{AssignError, Scope, ScopeRef};

pub const SYNC_FIELD_ERROR: &str = "ActionCalledInSyncFieldError";

/// Largest array a binding may grow by assignment.
const MAX_ARRAY_LENGTH: usize = 1 << 24;

/// Raise `name: message` as a thrown error object.
pub fn throw<T>(name: &str, message: impl AsRef<str>) -> JsResult<T> {
    Err(Thrown(JsValue::error(name, message.as_ref())))
}

pub fn type_error<T>(message: impl AsRef<str>) -> JsResult<T> {
    throw("TypeError", message)
}

enum Flow {
    Normal,
    Return(JsValue),
    Break,
    Continue,
}

/// An assignment target with its object and key already evaluated.
enum Place<'e> {
    Name(&'e str),
    Property(JsValue, String),
}

pub struct Interpreter<'a> {
    dispatcher: &'a dyn TriggerDispatcher,
    mode: ExecutionMode,
    max_call_depth: usize,
    max_loop_iterations: u64,
    depth: usize,
    microtasks: VecDeque<Job>,
    jobs_run: u64,
    trigger_seen: bool,
    /// Set while an `await` that can never complete unwinds to its async function.
    stalled: bool,
    top: ScopeRef,
}

impl<'a> Interpreter<'a> {
    /// Build the scope chain for one evaluation: globals, then library
    /// helpers, then context entities, then `locals`, each shadowing the
    /// previous layer.
    pub fn new(
        env: &Environment,
        library: &Registry,
        dispatcher: &'a dyn TriggerDispatcher,
        config: &EvalConfig,
        mode: ExecutionMode,
        context: &DataTree,
        locals: Vec<(&str, JsValue)>,
    ) -> Self {
        let library_scope = Scope::child(&env.scope());
        for (name, f) in library.entries() {
            library_scope.declare(name, JsValue::function(Callable::Library(f)), false);
        }
        let context_scope = Scope::child(&library_scope);
        for (name, entity) in context {
            context_scope.declare(name, value::from_json(entity), true);
        }
        let top = Scope::child(&context_scope);
        for (name, v) in locals {
            top.declare(name, v, true);
        }
        Self {
            dispatcher,
            mode,
            max_call_depth: config.max_call_depth,
            max_loop_iterations: config.max_loop_iterations,
            depth: 0,
            microtasks: VecDeque::new(),
            jobs_run: 0,
            trigger_seen: false,
            stalled: false,
            top,
        }
    }

    pub fn mode(&self) -> &ExecutionMode {
        &self.mode
    }

    /// Whether a trigger capability was invoked during this run.
    pub fn trigger_seen(&self) -> bool {
        self.trigger_seen
    }

    /// Run a program and return the value of its last expression statement.
    pub fn run_program(&mut self, program: &Program) -> JsResult<JsValue> {
        let scope = Scope::child(&self.top);
        hoist_vars(&program.body, &scope);
        self.hoist(&program.body, &scope);
        let mut completion = JsValue::Undefined;
        for stmt in &program.body {
            if let Stmt::Expr(expr) = stmt {
                completion = self.eval(expr, &scope)?;
                continue;
            }
            match self.exec_stmt(stmt, &scope)? {
                Flow::Normal => {}
                Flow::Return(_) => return throw("SyntaxError", "Illegal return statement"),
                Flow::Break | Flow::Continue => {
                    return throw("SyntaxError", "Illegal break or continue statement")
                }
            }
        }
        Ok(completion)
    }

    /// Evaluate an expression against the top-level scope.
    pub fn eval_expression(&mut self, expr: &Expr) -> JsResult<JsValue> {
        let scope = Scope::child(&self.top);
        self.eval(expr, &scope)
    }

    // ---- statements ------------------------------------------------------

    fn hoist(&mut self, stmts: &[Stmt], scope: &ScopeRef) {
        for stmt in stmts {
            if let Stmt::Function(def) = stmt {
                if let Some(name) = &def.name {
                    scope.declare(name, self.closure(def, scope), true);
                }
            }
        }
    }

    fn exec_block(&mut self, stmts: &[Stmt], scope: &ScopeRef) -> JsResult<Flow> {
        self.hoist(stmts, scope);
        for stmt in stmts {
            match self.exec_stmt(stmt, scope)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &ScopeRef) -> JsResult<Flow> {
        ensure_sufficient_stack(|| self.execute(stmt, scope))
    }

    fn execute(&mut self, stmt: &Stmt, scope: &ScopeRef) -> JsResult<Flow> {
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr, scope)?;
            }
            Stmt::Decl {
                kind: DeclKind::Var,
                decls,
            } => {
                for decl in decls {
                    if let Some(init) = &decl.init {
                        let value = self.eval(init, scope)?;
                        assign_var(scope, &decl.name, value);
                    }
                }
            }
            Stmt::Decl { kind, decls } => {
                for decl in decls {
                    let value = match &decl.init {
                        Some(init) => self.eval(init, scope)?,
                        None => JsValue::Undefined,
                    };
                    scope.declare(&decl.name, value, *kind != DeclKind::Const);
                }
            }
            Stmt::Function(_) | Stmt::Empty => {}
            Stmt::Return(arg) => {
                let value = match arg {
                    Some(expr) => self.eval(expr, scope)?,
                    None => JsValue::Undefined,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, scope)?.truthy() {
                    return self.exec_stmt(consequent, scope);
                }
                if let Some(alt) = alternate {
                    return self.exec_stmt(alt, scope);
                }
            }
            Stmt::Block(body) => return self.exec_block(body, &Scope::child(scope)),
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                let loop_scope = Scope::child(scope);
                if let Some(init) = init {
                    self.exec_stmt(init, &loop_scope)?;
                }
                let mut iterations = 0u64;
                loop {
                    if let Some(test) = test {
                        if !self.eval(test, &loop_scope)?.truthy() {
                            break;
                        }
                    }
                    self.count_iteration(&mut iterations)?;
                    match self.exec_stmt(body, &Scope::child(&loop_scope))? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if let Some(update) = update {
                        self.eval(update, &loop_scope)?;
                    }
                }
            }
            Stmt::ForOf {
                kind,
                name,
                iterable,
                body,
                ..
            } => {
                let items = self.eval(iterable, scope)?;
                let items = self.iterate(&items, iterable)?;
                let mut iterations = 0u64;
                for item in items {
                    self.count_iteration(&mut iterations)?;
                    let iter_scope = Scope::child(scope);
                    match kind {
                        DeclKind::Var => assign_var(scope, name, item),
                        _ => iter_scope.declare(name, item, *kind != DeclKind::Const),
                    }
                    match self.exec_stmt(body, &iter_scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Stmt::While { test, body } => {
                let mut iterations = 0u64;
                while self.eval(test, scope)?.truthy() {
                    self.count_iteration(&mut iterations)?;
                    match self.exec_stmt(body, &Scope::child(scope))? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
            Stmt::Throw(expr) => {
                let value = self.eval(expr, scope)?;
                return Err(Thrown(value));
            }
            Stmt::Try {
                block,
                param,
                handler,
                finalizer,
            } => {
                let outcome = match (self.exec_block(block, &Scope::child(scope)), handler) {
                    (Err(Thrown(err)), Some(handler)) if !self.stalled => {
                        let catch_scope = Scope::child(scope);
                        if let Some((name, _)) = param {
                            catch_scope.declare(name, err, true);
                        }
                        self.exec_block(handler, &catch_scope)
                    }
                    (outcome, _) => outcome,
                };
                if let Some(finalizer) = finalizer {
                    match self.exec_block(finalizer, &Scope::child(scope))? {
                        Flow::Normal => {}
                        other => return Ok(other),
                    }
                }
                return outcome;
            }
        }
        Ok(Flow::Normal)
    }

    fn count_iteration(&self, iterations: &mut u64) -> JsResult<()> {
        *iterations += 1;
        if *iterations > self.max_loop_iterations {
            return throw(
                "RangeError",
                format!("Loop iteration limit of {} exceeded", self.max_loop_iterations),
            );
        }
        Ok(())
    }

    /// Items visited by `for...of` and spread.
    fn iterate(&self, value: &JsValue, source: &Expr) -> JsResult<Vec<JsValue>> {
        match value {
            JsValue::Array(items) => Ok(items.borrow().clone()),
            JsValue::String(s) => Ok(s.chars().map(|c| JsValue::String(c.to_string())).collect()),
            _ => type_error(format!("{} is not iterable", source.callee_text())),
        }
    }

    // ---- expressions -----------------------------------------------------

    pub(crate) fn eval(&mut self, expr: &Expr, scope: &ScopeRef) -> JsResult<JsValue> {
        ensure_sufficient_stack(|| self.evaluate(expr, scope))
    }

    fn evaluate(&mut self, expr: &Expr, scope: &ScopeRef) -> JsResult<JsValue> {
        match expr {
            Expr::Number(n) => Ok(JsValue::Number(*n)),
            Expr::Str(s) => Ok(JsValue::String(s.clone())),
            Expr::Bool(b) => Ok(JsValue::Bool(*b)),
            Expr::Null => Ok(JsValue::Null),
            Expr::This => Ok(scope.this_value()),
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(t) => out.push_str(t),
                        TemplatePart::Expr(e) => {
                            out.push_str(&self.eval(e, scope)?.to_display_string())
                        }
                    }
                }
                Ok(JsValue::String(out))
            }
            Expr::Ident { name, .. } => match scope.lookup(name) {
                Some(v) => Ok(v),
                None => throw("ReferenceError", format!("{name} is not defined")),
            },
            Expr::Array(items) => Ok(JsValue::array(self.eval_list(items, scope)?)),
            Expr::Object(entries) => self.eval_object(entries, scope),
            Expr::Spread(inner) => self.eval(inner, scope),
            Expr::Member { .. } | Expr::Call { .. } => {
                Ok(self.eval_chain(expr, scope)?.unwrap_or_default())
            }
            Expr::New { callee, args, .. } => {
                let constructor = self.eval(callee, scope)?;
                let args = self.eval_list(args, scope)?;
                self.construct(&constructor, args, &callee.callee_text())
            }
            Expr::Unary { op, arg } => self.eval_unary(*op, arg, scope),
            Expr::Update {
                increment,
                prefix,
                target,
                ..
            } => {
                let place = self.place(target, scope)?;
                let old = self.read_place(&place, scope)?.to_number();
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.write_place(place, JsValue::Number(new), scope)?;
                Ok(JsValue::Number(if *prefix { new } else { old }))
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left, scope)?;
                let r = self.eval(right, scope)?;
                self.binary(*op, &l, &r, right)
            }
            Expr::Logical { op, left, right } => {
                let l = self.eval(left, scope)?;
                let short_circuit = match op {
                    LogicalOp::And => !l.truthy(),
                    LogicalOp::Or => l.truthy(),
                    LogicalOp::Nullish => !l.is_nullish(),
                };
                if short_circuit {
                    Ok(l)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(consequent, scope)
                } else {
                    self.eval(alternate, scope)
                }
            }
            Expr::Assign {
                op, target, value, ..
            } => {
                let place = self.place(target, scope)?;
                let value = match op {
                    AssignOp::Assign => self.eval(value, scope)?,
                    AssignOp::Compound(bin) => {
                        let current = self.read_place(&place, scope)?;
                        let rhs = self.eval(value, scope)?;
                        self.binary(*bin, &current, &rhs, value)?
                    }
                };
                self.write_place(place, value.clone(), scope)?;
                Ok(value)
            }
            Expr::Function(def) => match &def.name {
                // A named function expression can call itself by name.
                Some(name) if !def.is_arrow => {
                    let own = Scope::child(scope);
                    let function = self.closure(def, &own);
                    own.declare(name, function.clone(), true);
                    Ok(function)
                }
                _ => Ok(self.closure(def, scope)),
            },
            Expr::Await(arg) => {
                let value = self.eval(arg, scope)?;
                self.await_value(value)
            }
        }
    }

    /// Member accesses and calls. `None` means an optional link short-circuited.
    fn eval_chain(&mut self, expr: &Expr, scope: &ScopeRef) -> JsResult<Option<JsValue>> {
        match expr {
            Expr::Member {
                object,
                property,
                optional,
                ..
            } => {
                let Some(target) = self.eval_chain(object, scope)? else {
                    return Ok(None);
                };
                if *optional && target.is_nullish() {
                    return Ok(None);
                }
                let key = self.property_key(property, scope)?;
                self.get_property(&target, &key).map(Some)
            }
            Expr::Call {
                callee,
                args,
                optional,
                ..
            } => {
                let (function, this) = match callee.as_ref() {
                    Expr::Member {
                        object,
                        property,
                        optional: member_optional,
                        ..
                    } => {
                        let Some(target) = self.eval_chain(object, scope)? else {
                            return Ok(None);
                        };
                        if *member_optional && target.is_nullish() {
                            return Ok(None);
                        }
                        let key = self.property_key(property, scope)?;
                        (self.get_property(&target, &key)?, target)
                    }
                    other => match self.eval_chain(other, scope)? {
                        Some(f) => (f, JsValue::Undefined),
                        None => return Ok(None),
                    },
                };
                if *optional && function.is_nullish() {
                    return Ok(None);
                }
                let args = self.eval_list(args, scope)?;
                if !function.is_callable() {
                    return type_error(format!("{} is not a function", callee.callee_text()));
                }
                self.call_function(&function, this, args).map(Some)
            }
            other => self.eval(other, scope).map(Some),
        }
    }

    fn property_key(&mut self, property: &MemberProp, scope: &ScopeRef) -> JsResult<String> {
        match property {
            MemberProp::Named(name) => Ok(name.clone()),
            MemberProp::Computed(expr) => Ok(self.eval(expr, scope)?.to_property_key()),
        }
    }

    /// Evaluate array items or call arguments, expanding spreads.
    fn eval_list(&mut self, items: &[Expr], scope: &ScopeRef) -> JsResult<Vec<JsValue>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if let Expr::Spread(inner) = item {
                let value = self.eval(inner, scope)?;
                out.extend(self.iterate(&value, inner)?);
            } else {
                out.push(self.eval(item, scope)?);
            }
        }
        Ok(out)
    }

    fn eval_object(&mut self, entries: &[ObjectEntry], scope: &ScopeRef) -> JsResult<JsValue> {
        let cell = Rc::new(RefCell::new(JsObject::default()));
        for entry in entries {
            match entry {
                ObjectEntry::Prop(key, value) => {
                    let key = match key {
                        PropKey::Named(name) => name.clone(),
                        PropKey::Computed(expr) => self.eval(expr, scope)?.to_property_key(),
                    };
                    let value = self.eval(value, scope)?;
                    cell.borrow_mut().set(&key, value);
                }
                ObjectEntry::Spread(expr) => {
                    let source = self.eval(expr, scope)?;
                    for (k, v) in own_entries(&source) {
                        cell.borrow_mut().set(&k, v);
                    }
                }
            }
        }
        Ok(JsValue::Object(cell))
    }

    fn eval_unary(&mut self, op: UnaryOp, arg: &Expr, scope: &ScopeRef) -> JsResult<JsValue> {
        if op == UnaryOp::Typeof {
            if let Expr::Ident { name, .. } = arg {
                let t = scope.lookup(name).map_or("undefined", |v| v.type_of());
                return Ok(JsValue::string(t));
            }
        }
        let value = self.eval(arg, scope)?;
        Ok(match op {
            UnaryOp::Not => JsValue::Bool(!value.truthy()),
            UnaryOp::Neg => JsValue::Number(-value.to_number()),
            UnaryOp::Plus => JsValue::Number(value.to_number()),
            UnaryOp::Typeof => JsValue::string(value.type_of()),
            UnaryOp::Void => JsValue::Undefined,
        })
    }

    fn binary(&self, op: BinaryOp, l: &JsValue, r: &JsValue, rhs: &Expr) -> JsResult<JsValue> {
        use std::cmp::Ordering::{Equal, Greater, Less};
        let num = |f: fn(f64, f64) -> f64| JsValue::Number(f(l.to_number(), r.to_number()));
        Ok(match op {
            BinaryOp::Add => {
                let (pl, pr) = (to_primitive(l), to_primitive(r));
                if matches!(pl, JsValue::String(_)) || matches!(pr, JsValue::String(_)) {
                    JsValue::String(pl.to_display_string() + &pr.to_display_string())
                } else {
                    JsValue::Number(pl.to_number() + pr.to_number())
                }
            }
            BinaryOp::Sub => num(|a, b| a - b),
            BinaryOp::Mul => num(|a, b| a * b),
            BinaryOp::Div => num(|a, b| a / b),
            BinaryOp::Mod => num(|a, b| a % b),
            BinaryOp::Lt => JsValue::Bool(cmp_values(l, r) == Some(Less)),
            BinaryOp::Gt => JsValue::Bool(cmp_values(l, r) == Some(Greater)),
            BinaryOp::Le => JsValue::Bool(matches!(cmp_values(l, r), Some(Less | Equal))),
            BinaryOp::Ge => JsValue::Bool(matches!(cmp_values(l, r), Some(Greater | Equal))),
            BinaryOp::Eq => JsValue::Bool(loose_equals(l, r)),
            BinaryOp::Ne => JsValue::Bool(!loose_equals(l, r)),
            BinaryOp::StrictEq => JsValue::Bool(strict_equals(l, r)),
            BinaryOp::StrictNe => JsValue::Bool(!strict_equals(l, r)),
            BinaryOp::In => {
                let key = l.to_property_key();
                match r {
                    JsValue::Object(o) => JsValue::Bool(o.borrow().contains(&key)),
                    JsValue::Array(a) => JsValue::Bool(
                        key == "length"
                            || key.parse::<usize>().is_ok_and(|i| i < a.borrow().len()),
                    ),
                    _ => {
                        return type_error(format!(
                            "Cannot use 'in' operator to search for '{key}' in {}",
                            r.to_display_string()
                        ))
                    }
                }
            }
            BinaryOp::Instanceof => match r {
                JsValue::Function(f) => JsValue::Bool(builtins::instance_of(l, f)),
                _ => {
                    return type_error(format!(
                        "Right-hand side of 'instanceof' is not callable ({})",
                        rhs.callee_text()
                    ))
                }
            },
        })
    }

    /// Evaluate the object and key of an assignment target once, so a
    /// compound assignment reads and writes the same property.
    fn place<'e>(&mut self, target: &'e Expr, scope: &ScopeRef) -> JsResult<Place<'e>> {
        match target {
            Expr::Ident { name, .. } => Ok(Place::Name(name)),
            Expr::Member {
                object, property, ..
            } => {
                let object = self.eval(object, scope)?;
                let key = self.property_key(property, scope)?;
                Ok(Place::Property(object, key))
            }
            _ => throw("SyntaxError", "Invalid left-hand side in assignment"),
        }
    }

    fn read_place(&self, place: &Place<'_>, scope: &ScopeRef) -> JsResult<JsValue> {
        match place {
            Place::Name(name) => match scope.lookup(name) {
                Some(v) => Ok(v),
                None => throw("ReferenceError", format!("{name} is not defined")),
            },
            Place::Property(object, key) => self.get_property(object, key),
        }
    }

    fn write_place(&self, place: Place<'_>, value: JsValue, scope: &ScopeRef) -> JsResult<()> {
        match place {
            Place::Name(name) => match scope.assign(name, value) {
                Ok(()) => Ok(()),
                Err(AssignError::Constant) => type_error("Assignment to constant variable."),
                Err(AssignError::Undeclared) => {
                    throw("ReferenceError", format!("{name} is not defined"))
                }
            },
            Place::Property(object, key) => self.set_property(&object, &key, value),
        }
    }

    // ---- properties ------------------------------------------------------

    pub(crate) fn get_property(&self, target: &JsValue, key: &str) -> JsResult<JsValue> {
        if target.is_nullish() {
            return type_error(format!(
                "Cannot read properties of {} (reading '{key}')",
                target.to_display_string()
            ));
        }
        let own = match target {
            JsValue::Object(o) => o.borrow().get(key).cloned(),
            JsValue::Array(a) => {
                let items = a.borrow();
                if key == "length" {
                    Some(JsValue::Number(items.len() as f64))
                } else {
                    key.parse::<usize>()
                        .ok()
                        .map(|i| items.get(i).cloned().unwrap_or_default())
                }
            }
            JsValue::String(s) => {
                if key == "length" {
                    Some(JsValue::Number(s.encode_utf16().count() as f64))
                } else {
                    key.parse::<usize>().ok().map(|i| {
                        s.encode_utf16()
                            .nth(i)
                            .map_or(JsValue::Undefined, |u| {
                                JsValue::String(builtins::units_to_string(&[u]))
                            })
                    })
                }
            }
            JsValue::Function(f) => match (f.as_ref(), key) {
                (_, "name") => Some(JsValue::String(f.name())),
                (Callable::Native(n), _) => n
                    .statics
                    .iter()
                    .find(|(name, _)| *name == key)
                    .map(|(_, v)| v.clone()),
                _ => None,
            },
            _ => None,
        };
        if let Some(v) = own {
            return Ok(v);
        }
        if builtins::has_method(target, key) {
            return Ok(JsValue::function(Callable::Method {
                receiver: target.clone(),
                name: key.to_string(),
            }));
        }
        Ok(JsValue::Undefined)
    }

    pub(crate) fn set_property(&self, target: &JsValue, key: &str, value: JsValue) -> JsResult<()> {
        match target {
            JsValue::Undefined | JsValue::Null => type_error(format!(
                "Cannot set properties of {} (setting '{key}')",
                target.to_display_string()
            )),
            JsValue::Object(o) => {
                o.borrow_mut().set(key, value);
                Ok(())
            }
            JsValue::Array(a) => {
                let mut items = a.borrow_mut();
                if key == "length" {
                    let len = value.to_number();
                    if len < 0.0 || len.fract() != 0.0 || len > MAX_ARRAY_LENGTH as f64 {
                        drop(items);
                        return throw("RangeError", "Invalid array length");
                    }
                    items.resize(len as usize, JsValue::Undefined);
                } else if let Ok(i) = key.parse::<usize>() {
                    if i >= MAX_ARRAY_LENGTH {
                        drop(items);
                        return throw("RangeError", "Invalid array length");
                    }
                    if i >= items.len() {
                        items.resize(i + 1, JsValue::Undefined);
                    }
                    items[i] = value;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // ---- calls -----------------------------------------------------------

    fn closure(&self, def: &Rc<FunctionDef>, scope: &ScopeRef) -> JsValue {
        JsValue::function(Callable::Closure {
            def: def.clone(),
            scope: scope.clone(),
        })
    }

    pub fn call_function(
        &mut self,
        function: &JsValue,
        this: JsValue,
        args: Vec<JsValue>,
    ) -> JsResult<JsValue> {
        let JsValue::Function(callable) = function else {
            return type_error(format!("{} is not a function", function.to_display_string()));
        };
        if self.depth >= self.max_call_depth {
            return throw("RangeError", "Maximum call stack size exceeded");
        }
        self.depth += 1;
        let result = self.invoke(callable, this, args);
        self.depth -= 1;
        result
    }

    fn invoke(&mut self, callable: &Callable, this: JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
        match callable {
            Callable::Closure { def, scope } => self.call_closure(def, scope, this, args),
            Callable::Native(native) => match native.call {
                Some(call) => call(self, &this, args),
                None => type_error(format!(
                    "Class constructor {} cannot be invoked without 'new'",
                    native.name
                )),
            },
            Callable::Method { receiver, name } => {
                builtins::call_method(self, receiver, name, args)
            }
            Callable::Library(f) => self.call_library(f, args),
            Callable::Trigger(spec) => self.call_trigger(spec, args),
            Callable::Resolver {
                promise,
                reject,
                already,
            } => {
                if !already.replace(true) {
                    let value = args.into_iter().next().unwrap_or_default();
                    if *reject {
                        self.reject_promise(promise, value);
                    } else {
                        self.resolve_promise(promise, value);
                    }
                }
                Ok(JsValue::Undefined)
            }
        }
    }

    fn call_closure(
        &mut self,
        def: &FunctionDef,
        captured: &ScopeRef,
        this: JsValue,
        args: Vec<JsValue>,
    ) -> JsResult<JsValue> {
        let scope = if def.is_arrow {
            Scope::child(captured)
        } else {
            Scope::function(captured, this)
        };
        if !def.is_async {
            self.bind_params(def, &scope, args)?;
            return self.run_body(def, &scope);
        }
        let promise = self.new_promise();
        let outcome = self
            .bind_params(def, &scope, args)
            .and_then(|()| self.run_body(def, &scope));
        match outcome {
            Ok(value) => self.resolve_promise(&promise, value),
            Err(_) if self.stalled => {
                self.stalled = false;
                debug!("async function suspended on a promise that never settles");
            }
            Err(Thrown(reason)) => self.reject_promise(&promise, reason),
        }
        Ok(JsValue::Promise(promise))
    }

    fn bind_params(&mut self, def: &FunctionDef, scope: &ScopeRef, args: Vec<JsValue>) -> JsResult<()> {
        let mut args = args.into_iter();
        for param in &def.params {
            let mut value = args.next().unwrap_or_default();
            if let (JsValue::Undefined, Some(default)) = (&value, &param.default) {
                value = self.eval(default, scope)?;
            }
            scope.declare(&param.name, value, true);
        }
        Ok(())
    }

    fn run_body(&mut self, def: &FunctionDef, scope: &ScopeRef) -> JsResult<JsValue> {
        match &def.body {
            FunctionBody::Expr(expr) => self.eval(expr, scope),
            FunctionBody::Block(stmts) => {
                hoist_vars(stmts, scope);
                match self.exec_block(stmts, scope)? {
                    Flow::Return(value) => Ok(value),
                    _ => Ok(JsValue::Undefined),
                }
            }
        }
    }

    pub(crate) fn construct(
        &mut self,
        constructor: &JsValue,
        args: Vec<JsValue>,
        text: &str,
    ) -> JsResult<JsValue> {
        let JsValue::Function(callable) = constructor else {
            return type_error(format!("{text} is not a constructor"));
        };
        match callable.as_ref() {
            Callable::Native(native) => match native.construct {
                Some(construct) => construct(self, &JsValue::Undefined, args),
                None => type_error(format!("{text} is not a constructor")),
            },
            Callable::Closure { def, .. } if !def.is_arrow && !def.is_async => {
                let this = JsValue::object(Vec::new());
                let returned = self.call_function(constructor, this.clone(), args)?;
                Ok(match returned {
                    JsValue::Object(_) | JsValue::Array(_) => returned,
                    _ => this,
                })
            }
            _ => type_error(format!("{text} is not a constructor")),
        }
    }

    fn call_library(&mut self, f: &Arc<dyn Function>, args: Vec<JsValue>) -> JsResult<JsValue> {
        let arity = f.arity();
        if !arity.contains(&args.len()) {
            let expected = if arity.start() == arity.end() {
                arity.start().to_string()
            } else {
                format!("{} to {}", arity.start(), arity.end())
            };
            return type_error(format!(
                "{} expects {expected} argument(s), got {}",
                f.name(),
                args.len()
            ));
        }
        let json = args
            .iter()
            .map(|a| export(a).map(|v| v.unwrap_or(serde_json::Value::Null)))
            .collect::<JsResult<Vec<_>>>()?;
        match f.call(&json) {
            Ok(v) => Ok(value::from_json(&v)),
            Err(SandboxError::Library { class, message }) => throw(class, message),
            Err(other) => throw("Error", other.to_string()),
        }
    }

    fn call_trigger(&mut self, spec: &TriggerSpec, args: Vec<JsValue>) -> JsResult<JsValue> {
        match &self.mode {
            ExecutionMode::Sync => throw(
                SYNC_FIELD_ERROR,
                format!(
                    "Found a reference to {0} during evaluation. Sync fields cannot execute framework actions. Please remove any direct/indirect references to {0} and try again.",
                    spec.name
                ),
            ),
            ExecutionMode::Trial => {
                self.trigger_seen = true;
                Ok(JsValue::Promise(self.new_promise()))
            }
            ExecutionMode::Async { request_id } => {
                self.trigger_seen = true;
                let json = args
                    .iter()
                    .map(|a| export(a).map(|v| v.unwrap_or(serde_json::Value::Null)))
                    .collect::<JsResult<Vec<_>>>()?;
                let call = TriggerCall::new(spec, json);
                debug!(request_id = %request_id, action = %call.action_type, "dispatching trigger");
                let settlement = match self.dispatcher.dispatch(&call) {
                    Ok(v) => promise::Settlement::Fulfilled(value::from_json(&v)),
                    Err(e) => promise::Settlement::Rejected(JsValue::error("Error", &e.0)),
                };
                Ok(JsValue::Promise(self.settled_promise(settlement)))
            }
        }
    }
}

/// Bind every `var` of a function body up front, leaving parameters and
/// earlier bindings of the same name alone.
fn hoist_vars(stmts: &[Stmt], scope: &ScopeRef) {
    for (name, _) in ast::var_declarations(stmts) {
        if !scope.has_own(name) {
            scope.declare(name, JsValue::Undefined, true);
        }
    }
}

/// Store a `var` initializer into the binding hoisted by [`hoist_vars`].
fn assign_var(scope: &ScopeRef, name: &str, value: JsValue) {
    if scope.assign(name, value.clone()).is_err() {
        scope.declare(name, value, true);
    }
}

/// [`value::to_json`] with the circular-structure failure raised as a `TypeError`.
pub fn export(value: &JsValue) -> JsResult<Option<serde_json::Value>> {
    value::to_json(value).or_else(|_| type_error("Converting circular structure to JSON"))
}

/// Own enumerable entries, as seen by spread, `Object.keys` and friends.
pub(crate) fn own_entries(value: &JsValue) -> Vec<(String, JsValue)> {
    match value {
        JsValue::Object(o) => {
            let o = o.borrow();
            if o.kind == ObjectKind::Error {
                return Vec::new();
            }
            o.entries.clone()
        }
        JsValue::Array(a) => a
            .borrow()
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect(),
        JsValue::String(s) => s
            .encode_utf16()
            .enumerate()
            .map(|(i, u)| (i.to_string(), JsValue::String(builtins::units_to_string(&[u]))))
            .collect(),
        _ => Vec::new(),
    }
}
