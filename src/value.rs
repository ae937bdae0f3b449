//! Runtime values of the binding language and their JSON bridge.

use serde_json::{Map, Number, Value};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::ast::FunctionDef;
use crate::functions::Function;
use crate::interpreter::scope::ScopeRef;
use crate::interpreter::Interpreter;
use crate::triggers::TriggerSpec;

pub type ArrayRef = Rc<RefCell<Vec<JsValue>>>;
pub type ObjectRef = Rc<RefCell<JsObject>>;
pub type PromiseRef = Rc<RefCell<PromiseCell>>;

/// A value thrown by `throw`, a failed builtin, or a rejected `await`.
#[derive(Clone, Debug)]
pub struct Thrown(pub JsValue);

pub type JsResult<T> = Result<T, Thrown>;

pub type NativeFn = fn(&mut Interpreter<'_>, &JsValue, Vec<JsValue>) -> JsResult<JsValue>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ObjectKind {
    #[default]
    Plain,
    Error,
}

#[derive(Clone, Debug, Default)]
pub struct JsObject {
    pub entries: Vec<(String, JsValue)>,
    pub kind: ObjectKind,
    /// Writes to a frozen object are silently dropped.
    pub frozen: bool,
}

impl JsObject {
    pub fn get(&self, key: &str) -> Option<&JsValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn set(&mut self, key: &str, value: JsValue) {
        if self.frozen {
            return;
        }
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }
}

#[derive(Clone, Debug)]
pub enum PromiseState {
    Pending,
    Fulfilled(JsValue),
    Rejected(JsValue),
}

#[derive(Debug)]
pub struct PromiseCell {
    pub state: PromiseState,
    pub reactions: Vec<crate::interpreter::promise::Reaction>,
}

pub struct NativeFunction {
    pub name: &'static str,
    pub call: Option<NativeFn>,
    pub construct: Option<NativeFn>,
    /// Static members, e.g. `Promise.resolve`.
    pub statics: Vec<(&'static str, JsValue)>,
}

pub enum Callable {
    Closure {
        def: Rc<FunctionDef>,
        scope: ScopeRef,
    },
    Native(NativeFunction),
    /// A builtin method looked up on a receiver, e.g. `[1, 2].map`.
    Method {
        receiver: JsValue,
        name: String,
    },
    Library(Arc<dyn Function>),
    Trigger(&'static TriggerSpec),
    Resolver {
        promise: PromiseRef,
        reject: bool,
        already: Rc<Cell<bool>>,
    },
}

impl Callable {
    pub fn name(&self) -> String {
        match self {
            Callable::Closure { def, .. } => def.name.clone().unwrap_or_default(),
            Callable::Native(n) => n.name.to_string(),
            Callable::Method { name, .. } => name.clone(),
            Callable::Library(f) => f.name().to_string(),
            Callable::Trigger(t) => t.name.to_string(),
            Callable::Resolver { .. } => String::new(),
        }
    }
}

#[derive(Clone, Default)]
pub enum JsValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(ArrayRef),
    Object(ObjectRef),
    Function(Rc<Callable>),
    Promise(PromiseRef),
}

impl fmt::Debug for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsValue::Undefined => f.write_str("undefined"),
            JsValue::Null => f.write_str("null"),
            JsValue::Bool(b) => write!(f, "{b}"),
            JsValue::Number(n) => f.write_str(&number_to_string(*n)),
            JsValue::String(s) => write!(f, "{s:?}"),
            JsValue::Array(a) => write!(f, "Array({})", a.borrow().len()),
            JsValue::Object(o) => write!(f, "Object({} keys)", o.borrow().entries.len()),
            JsValue::Function(c) => write!(f, "Function({})", c.name()),
            JsValue::Promise(_) => f.write_str("Promise"),
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable({})", self.name())
    }
}

impl JsValue {
    pub fn string(s: impl Into<String>) -> Self {
        JsValue::String(s.into())
    }

    pub fn array(items: Vec<JsValue>) -> Self {
        JsValue::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(entries: Vec<(String, JsValue)>) -> Self {
        JsValue::Object(Rc::new(RefCell::new(JsObject {
            entries,
            ..JsObject::default()
        })))
    }

    pub fn frozen_object(entries: Vec<(String, JsValue)>) -> Self {
        JsValue::Object(Rc::new(RefCell::new(JsObject {
            entries,
            kind: ObjectKind::Plain,
            frozen: true,
        })))
    }

    pub fn error(name: &str, message: &str) -> Self {
        JsValue::Object(Rc::new(RefCell::new(JsObject {
            entries: vec![
                ("name".into(), JsValue::string(name)),
                ("message".into(), JsValue::string(message)),
            ],
            kind: ObjectKind::Error,
            frozen: false,
        })))
    }

    pub fn function(callable: Callable) -> Self {
        JsValue::Function(Rc::new(callable))
    }

    pub fn native(name: &'static str, call: NativeFn) -> Self {
        Self::function(Callable::Native(NativeFunction {
            name,
            call: Some(call),
            construct: None,
            statics: Vec::new(),
        }))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, JsValue::Undefined | JsValue::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, JsValue::Function(_))
    }

    pub fn truthy(&self) -> bool {
        match self {
            JsValue::Undefined | JsValue::Null => false,
            JsValue::Bool(b) => *b,
            JsValue::Number(n) => *n != 0.0 && !n.is_nan(),
            JsValue::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            JsValue::Undefined => "undefined",
            JsValue::Bool(_) => "boolean",
            JsValue::Number(_) => "number",
            JsValue::String(_) => "string",
            JsValue::Function(_) => "function",
            _ => "object",
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            JsValue::Undefined => f64::NAN,
            JsValue::Null => 0.0,
            JsValue::Bool(b) => f64::from(u8::from(*b)),
            JsValue::Number(n) => *n,
            JsValue::String(s) => string_to_number(s),
            JsValue::Array(a) => {
                let items = a.borrow();
                match items.len() {
                    0 => 0.0,
                    1 => items[0].to_number(),
                    _ => f64::NAN,
                }
            }
            _ => f64::NAN,
        }
    }

    /// `ToString` as used by `+`, template literals and `String(x)`.
    pub fn to_display_string(&self) -> String {
        match self {
            JsValue::Undefined => "undefined".into(),
            JsValue::Null => "null".into(),
            JsValue::Bool(b) => b.to_string(),
            JsValue::Number(n) => number_to_string(*n),
            JsValue::String(s) => s.clone(),
            JsValue::Array(a) => a
                .borrow()
                .iter()
                .map(|v| {
                    if v.is_nullish() {
                        String::new()
                    } else {
                        v.to_display_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(","),
            JsValue::Object(o) => {
                let o = o.borrow();
                if o.kind == ObjectKind::Error {
                    error_summary(&o)
                } else {
                    "[object Object]".into()
                }
            }
            JsValue::Function(c) => format!("function {}() {{ [native code] }}", c.name()),
            JsValue::Promise(_) => "[object Promise]".into(),
        }
    }

    /// Property key form of a value used in `obj[key]`.
    pub fn to_property_key(&self) -> String {
        self.to_display_string()
    }
}

/// `Name: message` for error objects.
pub fn error_summary(o: &JsObject) -> String {
    let name = o
        .get("name")
        .map(JsValue::to_display_string)
        .unwrap_or_else(|| "Error".into());
    let message = o
        .get("message")
        .map(JsValue::to_display_string)
        .unwrap_or_default();
    format!("{name}: {message}")
}

/// Render a thrown value as `"<ClassName>: <message>"`.
pub fn describe_thrown(value: &JsValue) -> String {
    match value {
        JsValue::Object(o) if o.borrow().kind == ObjectKind::Error => error_summary(&o.borrow()),
        other => format!("Error: {}", other.to_display_string()),
    }
}

pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".into();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.into();
    }
    if n == 0.0 {
        return "0".into();
    }
    if n < 0.0 {
        return format!("-{}", number_to_string(-n));
    }
    // Shortest round-trip digits, then placed the way Number.prototype.toString does.
    let sci = format!("{n:e}");
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let k = digits.len() as i32;
    let point = exponent.parse::<i32>().unwrap_or(0) + 1;
    if k <= point && point <= 21 {
        format!("{digits}{}", "0".repeat((point - k) as usize))
    } else if 0 < point && point <= 21 {
        let (int, frac) = digits.split_at(point as usize);
        format!("{int}.{frac}")
    } else if -6 < point && point <= 0 {
        format!("0.{}{digits}", "0".repeat(-point as usize))
    } else {
        let (first, rest) = digits.split_at(1);
        let e = point - 1;
        let sign = if e < 0 { '-' } else { '+' };
        if rest.is_empty() {
            format!("{first}e{sign}{}", e.abs())
        } else {
            format!("{first}.{rest}e{sign}{}", e.abs())
        }
    }
}

fn string_to_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map_or(f64::NAN, |n| n as f64);
    }
    match t {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if t.chars().any(|c| c.is_alphabetic() && c != 'e' && c != 'E') => f64::NAN,
        _ => t.parse::<f64>().unwrap_or(f64::NAN),
    }
}

const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

fn number_to_json(n: f64) -> Value {
    if !n.is_finite() {
        return Value::Null;
    }
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return Value::from(n as i64);
    }
    Number::from_f64(n).map_or(Value::Null, Value::Number)
}

pub fn from_json(value: &Value) -> JsValue {
    match value {
        Value::Null => JsValue::Null,
        Value::Bool(b) => JsValue::Bool(*b),
        Value::Number(n) => JsValue::Number(n.as_f64().unwrap_or(f64::NAN)),
        Value::String(s) => JsValue::String(s.clone()),
        Value::Array(items) => JsValue::array(items.iter().map(from_json).collect()),
        Value::Object(map) => JsValue::object(
            map.iter()
                .map(|(k, v)| (k.clone(), from_json(v)))
                .collect(),
        ),
    }
}

/// Raised by [`to_json`] when a value contains itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CircularStructure;

/// `JSON.stringify` semantics: `None` for values with no JSON form.
pub fn to_json(value: &JsValue) -> Result<Option<Value>, CircularStructure> {
    let mut seen = Vec::new();
    to_json_inner(value, &mut seen)
}

fn to_json_inner(
    value: &JsValue,
    seen: &mut Vec<*const ()>,
) -> Result<Option<Value>, CircularStructure> {
    Ok(Some(match value {
        JsValue::Undefined | JsValue::Function(_) => return Ok(None),
        JsValue::Null => Value::Null,
        JsValue::Bool(b) => Value::Bool(*b),
        JsValue::Number(n) => number_to_json(*n),
        JsValue::String(s) => Value::String(s.clone()),
        JsValue::Promise(_) => Value::Object(Map::new()),
        JsValue::Array(a) => {
            let ptr = Rc::as_ptr(a).cast::<()>();
            if seen.contains(&ptr) {
                return Err(CircularStructure);
            }
            seen.push(ptr);
            let mut out = Vec::new();
            for item in a.borrow().iter() {
                out.push(to_json_inner(item, seen)?.unwrap_or(Value::Null));
            }
            seen.pop();
            Value::Array(out)
        }
        JsValue::Object(o) => {
            let ptr = Rc::as_ptr(o).cast::<()>();
            if seen.contains(&ptr) {
                return Err(CircularStructure);
            }
            seen.push(ptr);
            let mut out = Map::new();
            for (k, v) in o.borrow().entries.iter() {
                if let Some(json) = to_json_inner(v, seen)? {
                    out.insert(k.clone(), json);
                }
            }
            seen.pop();
            Value::Object(out)
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn numbers_render_like_javascript() {
        assert_eq!(number_to_string(3.0), "3");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1.5e300), "1.5e+300");
        assert_eq!(number_to_string(123456789012345680000.0), "123456789012345680000");
        assert_eq!(number_to_string(-1234.5), "-1234.5");
        assert_eq!(number_to_string(0.000001), "0.000001");
        assert_eq!(number_to_string(1e-7), "1e-7");
        assert_eq!(number_to_string(2.5e-8), "2.5e-8");
    }

    #[test]
    fn json_export_follows_stringify_rules() {
        let v = JsValue::object(vec![
            ("a".into(), JsValue::Number(1.0)),
            ("skip".into(), JsValue::Undefined),
            (
                "list".into(),
                JsValue::array(vec![JsValue::Undefined, JsValue::Number(1.5)]),
            ),
            ("nan".into(), JsValue::Number(f64::NAN)),
        ]);
        assert_eq!(
            to_json(&v).unwrap(),
            Some(json!({"a": 1, "list": [null, 1.5], "nan": null}))
        );
        assert_eq!(to_json(&JsValue::Undefined).unwrap(), None);
    }

    #[test]
    fn circular_values_are_detected() {
        let obj = JsValue::object(vec![]);
        if let JsValue::Object(o) = &obj {
            o.borrow_mut().set("me", obj.clone());
        }
        assert_eq!(to_json(&obj), Err(CircularStructure));
        if let JsValue::Object(o) = &obj {
            o.borrow_mut().entries.clear();
        }
    }

    #[test]
    fn string_coercions() {
        assert_eq!(JsValue::string(" 42 ").to_number(), 42.0);
        assert!(JsValue::string("4a").to_number().is_nan());
        assert_eq!(JsValue::string("").to_number(), 0.0);
        let arr = JsValue::array(vec![JsValue::Number(1.0), JsValue::Null, JsValue::string("x")]);
        assert_eq!(arr.to_display_string(), "1,,x");
        assert_eq!(
            describe_thrown(&JsValue::error("TypeError", "boom")),
            "TypeError: boom"
        );
    }
}
