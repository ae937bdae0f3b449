//! Allow-listed globals and the methods of builtin value types.

use itertools::Itertools;
use serde::Serialize;
use std::cmp::Ordering;

use super::{export, own_entries, throw, type_error, Interpreter};
use crate::comparison::strict_equals;
use crate::value::{
    self, error_summary, number_to_string, ArrayRef, Callable, JsResult, JsValue, NativeFn,
    NativeFunction, ObjectKind, ObjectRef, PromiseRef, Thrown,
};

pub const ERROR_CLASSES: &[&str] = &[
    "Error",
    "TypeError",
    "ReferenceError",
    "SyntaxError",
    "RangeError",
];

const ARRAY_METHODS: &[&str] = &[
    "map", "filter", "reduce", "forEach", "find", "findIndex", "some", "every", "includes",
    "indexOf", "join", "slice", "concat", "push", "pop", "reverse", "sort", "flat",
];

const STRING_METHODS: &[&str] = &[
    "toUpperCase",
    "toLowerCase",
    "trim",
    "split",
    "includes",
    "startsWith",
    "endsWith",
    "indexOf",
    "slice",
    "substring",
    "replace",
    "replaceAll",
    "charAt",
    "padStart",
    "repeat",
    "toString",
];

const MAX_STRING_BYTES: f64 = (1u64 << 29) as f64;
const MAX_ARRAY_LENGTH: usize = 1 << 24;

const NUMBER_METHODS: &[&str] = &["toFixed", "toString"];
const FUNCTION_METHODS: &[&str] = &["call", "apply"];
const PROMISE_METHODS: &[&str] = &["then", "catch", "finally"];
const OBJECT_METHODS: &[&str] = &["hasOwnProperty", "toString"];

/// The allow-listed global bindings, in installation order.
pub fn globals() -> Vec<(&'static str, JsValue)> {
    let mut globals = vec![
        ("undefined", JsValue::Undefined),
        ("NaN", JsValue::Number(f64::NAN)),
        ("Infinity", JsValue::Number(f64::INFINITY)),
        ("Math", math()),
        ("JSON", json()),
        (
            "Object",
            constructor(
                "Object",
                Some(object_call),
                Some(object_call),
                vec![
                    ("keys", JsValue::native("keys", object_keys)),
                    ("values", JsValue::native("values", object_values)),
                    ("entries", JsValue::native("entries", object_entries)),
                    ("assign", JsValue::native("assign", object_assign)),
                ],
            ),
        ),
        (
            "Array",
            constructor(
                "Array",
                Some(array_call),
                Some(array_call),
                vec![
                    ("isArray", JsValue::native("isArray", array_is_array)),
                    ("from", JsValue::native("from", array_from)),
                ],
            ),
        ),
        ("Number", constructor("Number", Some(number_call), None, Vec::new())),
        ("String", constructor("String", Some(string_call), None, Vec::new())),
        ("Boolean", constructor("Boolean", Some(boolean_call), None, Vec::new())),
        (
            "Promise",
            constructor(
                "Promise",
                None,
                Some(promise_construct),
                vec![
                    ("resolve", JsValue::native("resolve", promise_resolve)),
                    ("reject", JsValue::native("reject", promise_reject)),
                    ("all", JsValue::native("all", promise_all)),
                ],
            ),
        ),
        ("parseInt", JsValue::native("parseInt", parse_int)),
        ("parseFloat", JsValue::native("parseFloat", parse_float)),
        ("isNaN", JsValue::native("isNaN", is_nan)),
        ("isFinite", JsValue::native("isFinite", is_finite)),
        ("console", console()),
    ];
    let error_constructors: [NativeFn; 5] = [
        error_ctor,
        type_error_ctor,
        reference_error_ctor,
        syntax_error_ctor,
        range_error_ctor,
    ];
    for (name, ctor) in ERROR_CLASSES.iter().copied().zip(error_constructors) {
        globals.push((name, constructor(name, Some(ctor), Some(ctor), Vec::new())));
    }
    globals
}

fn constructor(
    name: &'static str,
    call: Option<NativeFn>,
    construct: Option<NativeFn>,
    statics: Vec<(&'static str, JsValue)>,
) -> JsValue {
    JsValue::function(Callable::Native(NativeFunction {
        name,
        call,
        construct,
        statics,
    }))
}

fn arg(args: &[JsValue], i: usize) -> JsValue {
    args.get(i).cloned().unwrap_or_default()
}

fn num(args: &[JsValue], i: usize) -> f64 {
    args.get(i).map_or(f64::NAN, JsValue::to_number)
}

fn callback(args: &[JsValue]) -> JsResult<JsValue> {
    match args.first() {
        Some(f) if f.is_callable() => Ok(f.clone()),
        other => type_error(format!(
            "{} is not a function",
            other.map_or_else(|| "undefined".to_string(), JsValue::to_display_string)
        )),
    }
}

// ---- errors ---------------------------------------------------------------

macro_rules! error_class {
    ($fn_name:ident, $class:literal) => {
        fn $fn_name(_: &mut Interpreter<'_>, _: &JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
            let message = match args.first() {
                None | Some(JsValue::Undefined) => String::new(),
                Some(m) => m.to_display_string(),
            };
            Ok(JsValue::error($class, &message))
        }
    };
}

error_class!(error_ctor, "Error");
error_class!(type_error_ctor, "TypeError");
error_class!(reference_error_ctor, "ReferenceError");
error_class!(syntax_error_ctor, "SyntaxError");
error_class!(range_error_ctor, "RangeError");

/// `value instanceof constructor` for the builtin constructors.
pub fn instance_of(value: &JsValue, constructor: &Callable) -> bool {
    let Callable::Native(native) = constructor else {
        return false;
    };
    match (native.name, value) {
        ("Array", JsValue::Array(_)) => true,
        ("Promise", JsValue::Promise(_)) => true,
        ("Object", v) => matches!(
            v,
            JsValue::Object(_) | JsValue::Array(_) | JsValue::Function(_) | JsValue::Promise(_)
        ),
        (class, JsValue::Object(o)) if ERROR_CLASSES.contains(&class) => {
            let o = o.borrow();
            o.kind == ObjectKind::Error
                && (class == "Error"
                    || o.get("name").map(JsValue::to_display_string).as_deref() == Some(class))
        }
        _ => false,
    }
}

// ---- Math -----------------------------------------------------------------

macro_rules! math_fn {
    ($fn_name:ident, $op:expr) => {
        fn $fn_name(_: &mut Interpreter<'_>, _: &JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
            let op: fn(f64) -> f64 = $op;
            Ok(JsValue::Number(op(num(&args, 0))))
        }
    };
}

math_fn!(math_abs, f64::abs);
math_fn!(math_floor, f64::floor);
math_fn!(math_ceil, f64::ceil);
math_fn!(math_round, |x| (x + 0.5).floor());
math_fn!(math_sqrt, f64::sqrt);
math_fn!(math_trunc, f64::trunc);
math_fn!(math_sign, |x| if x == 0.0 || x.is_nan() { x } else { x.signum() });

fn math_pow(_: &mut Interpreter<'_>, _: &JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
    Ok(JsValue::Number(num(&args, 0).powf(num(&args, 1))))
}

fn math_max(_: &mut Interpreter<'_>, _: &JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
    let mut out = f64::NEG_INFINITY;
    for n in args.iter().map(JsValue::to_number) {
        if n.is_nan() {
            return Ok(JsValue::Number(f64::NAN));
        }
        out = out.max(n);
    }
    Ok(JsValue::Number(out))
}

fn math_min(_: &mut Interpreter<'_>, _: &JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
    let mut out = f64::INFINITY;
    for n in args.iter().map(JsValue::to_number) {
        if n.is_nan() {
            return Ok(JsValue::Number(f64::NAN));
        }
        out = out.min(n);
    }
    Ok(JsValue::Number(out))
}

fn math() -> JsValue {
    let fns: [(&'static str, NativeFn); 10] = [
        ("abs", math_abs),
        ("floor", math_floor),
        ("ceil", math_ceil),
        ("round", math_round),
        ("max", math_max),
        ("min", math_min),
        ("pow", math_pow),
        ("sqrt", math_sqrt),
        ("trunc", math_trunc),
        ("sign", math_sign),
    ];
    let mut entries: Vec<(String, JsValue)> = fns
        .iter()
        .map(|&(name, f)| (name.to_string(), JsValue::native(name, f)))
        .collect();
    entries.push(("PI".into(), JsValue::Number(std::f64::consts::PI)));
    entries.push(("E".into(), JsValue::Number(std::f64::consts::E)));
    JsValue::frozen_object(entries)
}

// ---- JSON -----------------------------------------------------------------

fn json() -> JsValue {
    JsValue::frozen_object(vec![
        ("stringify".into(), JsValue::native("stringify", json_stringify)),
        ("parse".into(), JsValue::native("parse", json_parse)),
    ])
}

fn json_stringify(_: &mut Interpreter<'_>, _: &JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
    let Some(json) = export(&arg(&args, 0))? else {
        return Ok(JsValue::Undefined);
    };
    let indent = match arg(&args, 2) {
        JsValue::Number(n) if n >= 1.0 => " ".repeat(n.min(10.0) as usize),
        JsValue::String(s) => s.chars().take(10).collect(),
        _ => String::new(),
    };
    if indent.is_empty() {
        return Ok(JsValue::String(json.to_string()));
    }
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    if let Err(e) = json.serialize(&mut ser) {
        return type_error(e.to_string());
    }
    Ok(JsValue::String(String::from_utf8_lossy(&out).into_owned()))
}

fn json_parse(_: &mut Interpreter<'_>, _: &JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
    let text = arg(&args, 0).to_display_string();
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(v) => Ok(value::from_json(&v)),
        Err(e) => throw("SyntaxError", format!("Unexpected token in JSON ({e})")),
    }
}

// ---- Object / Array / primitives -------------------------------------------

fn object_call(_: &mut Interpreter<'_>, _: &JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
    Ok(match arg(&args, 0) {
        v if v.is_nullish() => JsValue::object(Vec::new()),
        v => v,
    })
}

fn object_source(args: &[JsValue]) -> JsResult<JsValue> {
    let v = arg(args, 0);
    if v.is_nullish() {
        return type_error("Cannot convert undefined or null to object");
    }
    Ok(v)
}

fn object_keys(_: &mut Interpreter<'_>, _: &JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
    let keys = own_entries(&object_source(&args)?)
        .into_iter()
        .map(|(k, _)| JsValue::String(k))
        .collect();
    Ok(JsValue::array(keys))
}

fn object_values(_: &mut Interpreter<'_>, _: &JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
    let values = own_entries(&object_source(&args)?)
        .into_iter()
        .map(|(_, v)| v)
        .collect();
    Ok(JsValue::array(values))
}

fn object_entries(_: &mut Interpreter<'_>, _: &JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
    let pairs = own_entries(&object_source(&args)?)
        .into_iter()
        .map(|(k, v)| JsValue::array(vec![JsValue::String(k), v]))
        .collect();
    Ok(JsValue::array(pairs))
}

fn object_assign(
    interp: &mut Interpreter<'_>,
    _: &JsValue,
    args: Vec<JsValue>,
) -> JsResult<JsValue> {
    let target = object_source(&args)?;
    for source in args.iter().skip(1) {
        for (k, v) in own_entries(source) {
            interp.set_property(&target, &k, v)?;
        }
    }
    Ok(target)
}

fn array_call(_: &mut Interpreter<'_>, _: &JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
    if let [JsValue::Number(n)] = args.as_slice() {
        if *n < 0.0 || n.fract() != 0.0 || *n > u32::MAX as f64 {
            return throw("RangeError", "Invalid array length");
        }
        return Ok(JsValue::array(vec![JsValue::Undefined; *n as usize]));
    }
    Ok(JsValue::array(args))
}

fn array_is_array(_: &mut Interpreter<'_>, _: &JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
    Ok(JsValue::Bool(matches!(arg(&args, 0), JsValue::Array(_))))
}

fn array_from(interp: &mut Interpreter<'_>, _: &JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
    let source = arg(&args, 0);
    let items: Vec<JsValue> = match &source {
        JsValue::Array(a) => a.borrow().clone(),
        JsValue::String(s) => s.chars().map(|c| JsValue::String(c.to_string())).collect(),
        JsValue::Object(o) => {
            let len = o.borrow().get("length").map_or(0.0, JsValue::to_number);
            let len = if len.is_finite() && len > 0.0 { len as usize } else { 0 };
            if len > MAX_ARRAY_LENGTH {
                return throw("RangeError", "Invalid array length");
            }
            (0..len)
                .map(|i| o.borrow().get(&i.to_string()).cloned().unwrap_or_default())
                .collect()
        }
        _ => Vec::new(),
    };
    let map = arg(&args, 1);
    if !map.is_callable() {
        return Ok(JsValue::array(items));
    }
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        out.push(interp.call_function(
            &map,
            JsValue::Undefined,
            vec![item, JsValue::Number(i as f64)],
        )?);
    }
    Ok(JsValue::array(out))
}

fn number_call(_: &mut Interpreter<'_>, _: &JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
    Ok(JsValue::Number(args.first().map_or(0.0, JsValue::to_number)))
}

fn string_call(_: &mut Interpreter<'_>, _: &JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
    Ok(JsValue::String(
        args.first().map(JsValue::to_display_string).unwrap_or_default(),
    ))
}

fn boolean_call(_: &mut Interpreter<'_>, _: &JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
    Ok(JsValue::Bool(arg(&args, 0).truthy()))
}

fn parse_int(_: &mut Interpreter<'_>, _: &JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
    let text = arg(&args, 0).to_display_string();
    let mut s = text.trim_start();
    let negative = s.starts_with('-');
    s = s.strip_prefix(['-', '+']).unwrap_or(s);
    let mut radix = match arg(&args, 1) {
        JsValue::Undefined => 10,
        r => r.to_number() as u32,
    };
    if radix == 0 {
        radix = 10;
    }
    if radix == 16 || arg(&args, 1).is_nullish() {
        if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            s = rest;
            radix = 16;
        }
    }
    if !(2..=36).contains(&radix) {
        return Ok(JsValue::Number(f64::NAN));
    }
    let digits: Vec<u32> = s.chars().map_while(|c| c.to_digit(radix)).collect();
    if digits.is_empty() {
        return Ok(JsValue::Number(f64::NAN));
    }
    let n = digits
        .iter()
        .fold(0.0, |acc, d| acc * f64::from(radix) + f64::from(*d));
    Ok(JsValue::Number(if negative { -n } else { n }))
}

fn parse_float(_: &mut Interpreter<'_>, _: &JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
    let text = arg(&args, 0).to_display_string();
    let s = text.trim_start();
    let unsigned = s.strip_prefix(['-', '+']).unwrap_or(s);
    if unsigned.starts_with("Infinity") {
        let inf = if s.starts_with('-') { f64::NEG_INFINITY } else { f64::INFINITY };
        return Ok(JsValue::Number(inf));
    }
    // Longest prefix that parses as a float.
    let mut best = f64::NAN;
    for (end, _) in s.char_indices().skip(1).chain(std::iter::once((s.len(), ' '))) {
        let prefix = &s[..end];
        if prefix.chars().any(|c| c.is_alphabetic() && c != 'e' && c != 'E') {
            break;
        }
        if let Ok(n) = prefix.parse::<f64>() {
            best = n;
        }
    }
    Ok(JsValue::Number(best))
}

fn is_nan(_: &mut Interpreter<'_>, _: &JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
    Ok(JsValue::Bool(num(&args, 0).is_nan()))
}

fn is_finite(_: &mut Interpreter<'_>, _: &JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
    Ok(JsValue::Bool(num(&args, 0).is_finite()))
}

// ---- Promise --------------------------------------------------------------

fn promise_construct(
    interp: &mut Interpreter<'_>,
    _: &JsValue,
    args: Vec<JsValue>,
) -> JsResult<JsValue> {
    let executor = arg(&args, 0);
    if !executor.is_callable() {
        return type_error(format!(
            "Promise resolver {} is not a function",
            executor.to_display_string()
        ));
    }
    let promise = interp.new_promise();
    let (resolve, reject) = interp.resolving_functions(&promise);
    if let Err(Thrown(e)) = interp.call_function(&executor, JsValue::Undefined, vec![resolve, reject])
    {
        interp.reject_promise(&promise, e);
    }
    Ok(JsValue::Promise(promise))
}

fn promise_resolve(
    interp: &mut Interpreter<'_>,
    _: &JsValue,
    args: Vec<JsValue>,
) -> JsResult<JsValue> {
    Ok(JsValue::Promise(interp.to_promise(arg(&args, 0))))
}

fn promise_reject(
    interp: &mut Interpreter<'_>,
    _: &JsValue,
    args: Vec<JsValue>,
) -> JsResult<JsValue> {
    let promise = interp.new_promise();
    interp.reject_promise(&promise, arg(&args, 0));
    Ok(JsValue::Promise(promise))
}

fn promise_all(interp: &mut Interpreter<'_>, _: &JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
    match arg(&args, 0) {
        JsValue::Array(items) => {
            let items = items.borrow().clone();
            Ok(JsValue::Promise(interp.promise_all(items)))
        }
        other => type_error(format!("{} is not iterable", other.to_display_string())),
    }
}

// ---- console --------------------------------------------------------------

fn console_line(args: &[JsValue]) -> String {
    args.iter()
        .map(|a| match a {
            JsValue::Array(_) | JsValue::Object(_) if !is_error(a) => export(a)
                .ok()
                .flatten()
                .map_or_else(|| a.to_display_string(), |v| v.to_string()),
            other => other.to_display_string(),
        })
        .join(" ")
}

fn is_error(value: &JsValue) -> bool {
    matches!(value, JsValue::Object(o) if o.borrow().kind == ObjectKind::Error)
}

macro_rules! console_fn {
    ($fn_name:ident, $level:ident) => {
        fn $fn_name(_: &mut Interpreter<'_>, _: &JsValue, args: Vec<JsValue>) -> JsResult<JsValue> {
            tracing::$level!(target: "binding_sandbox::console", "{}", console_line(&args));
            Ok(JsValue::Undefined)
        }
    };
}

console_fn!(console_log, info);
console_fn!(console_info, info);
console_fn!(console_debug, debug);
console_fn!(console_warn, warn);
console_fn!(console_error, error);

fn console() -> JsValue {
    JsValue::frozen_object(vec![
        ("log".into(), JsValue::native("log", console_log)),
        ("info".into(), JsValue::native("info", console_info)),
        ("debug".into(), JsValue::native("debug", console_debug)),
        ("warn".into(), JsValue::native("warn", console_warn)),
        ("error".into(), JsValue::native("error", console_error)),
    ])
}

// ---- methods --------------------------------------------------------------

pub fn has_method(receiver: &JsValue, name: &str) -> bool {
    let table: &[&str] = match receiver {
        JsValue::Array(_) => ARRAY_METHODS,
        JsValue::String(_) => STRING_METHODS,
        JsValue::Number(_) => NUMBER_METHODS,
        JsValue::Bool(_) => &["toString"],
        JsValue::Function(_) => FUNCTION_METHODS,
        JsValue::Promise(_) => PROMISE_METHODS,
        JsValue::Object(_) => OBJECT_METHODS,
        JsValue::Undefined | JsValue::Null => &[],
    };
    table.contains(&name)
}

pub fn call_method(
    interp: &mut Interpreter<'_>,
    receiver: &JsValue,
    name: &str,
    args: Vec<JsValue>,
) -> JsResult<JsValue> {
    match receiver {
        JsValue::Array(items) => array_method(interp, receiver, items, name, args),
        JsValue::String(s) => string_method(interp, s, name, args),
        JsValue::Number(n) => number_method(*n, name, &args),
        JsValue::Bool(b) => Ok(JsValue::string(b.to_string())),
        JsValue::Function(_) => function_method(interp, receiver, name, args),
        JsValue::Promise(p) => promise_method(interp, p, name, args),
        JsValue::Object(o) => object_method(o, name, &args),
        JsValue::Undefined | JsValue::Null => type_error(format!(
            "Cannot read properties of {} (reading '{name}')",
            receiver.to_display_string()
        )),
    }
}

/// Clamp a relative index as `slice` does.
fn relative_index(value: &JsValue, len: usize, default: usize) -> usize {
    if matches!(value, JsValue::Undefined) {
        return default;
    }
    let n = value.to_number();
    let n = if n.is_nan() { 0.0 } else { n.trunc() };
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

fn same_value_zero(a: &JsValue, b: &JsValue) -> bool {
    match (a, b) {
        (JsValue::Number(x), JsValue::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => strict_equals(a, b),
    }
}

fn array_method(
    interp: &mut Interpreter<'_>,
    receiver: &JsValue,
    items: &ArrayRef,
    name: &str,
    args: Vec<JsValue>,
) -> JsResult<JsValue> {
    let snapshot = items.borrow().clone();
    let index = |i: usize| JsValue::Number(i as f64);
    match name {
        "map" | "filter" | "forEach" | "find" | "findIndex" | "some" | "every" => {
            let f = callback(&args)?;
            let mut mapped = Vec::new();
            for (i, item) in snapshot.into_iter().enumerate() {
                let out = interp.call_function(
                    &f,
                    arg(&args, 1),
                    vec![item.clone(), index(i), receiver.clone()],
                )?;
                match name {
                    "map" => mapped.push(out),
                    "filter" if out.truthy() => mapped.push(item),
                    "find" if out.truthy() => return Ok(item),
                    "findIndex" if out.truthy() => return Ok(index(i)),
                    "some" if out.truthy() => return Ok(JsValue::Bool(true)),
                    "every" if !out.truthy() => return Ok(JsValue::Bool(false)),
                    _ => {}
                }
            }
            Ok(match name {
                "map" | "filter" => JsValue::array(mapped),
                "findIndex" => JsValue::Number(-1.0),
                "some" => JsValue::Bool(false),
                "every" => JsValue::Bool(true),
                _ => JsValue::Undefined,
            })
        }
        "reduce" => {
            let f = callback(&args)?;
            let mut iter = snapshot.into_iter().enumerate();
            let mut acc = if args.len() >= 2 {
                args[1].clone()
            } else {
                match iter.next() {
                    Some((_, first)) => first,
                    None => return type_error("Reduce of empty array with no initial value"),
                }
            };
            for (i, item) in iter {
                acc = interp.call_function(
                    &f,
                    JsValue::Undefined,
                    vec![acc, item, index(i), receiver.clone()],
                )?;
            }
            Ok(acc)
        }
        "includes" => {
            let needle = arg(&args, 0);
            Ok(JsValue::Bool(snapshot.iter().any(|v| same_value_zero(v, &needle))))
        }
        "indexOf" => {
            let needle = arg(&args, 0);
            Ok(snapshot
                .iter()
                .position(|v| strict_equals(v, &needle))
                .map_or(JsValue::Number(-1.0), index))
        }
        "join" => {
            let sep = match arg(&args, 0) {
                JsValue::Undefined => ",".to_string(),
                s => s.to_display_string(),
            };
            Ok(JsValue::String(
                snapshot
                    .iter()
                    .map(|v| if v.is_nullish() { String::new() } else { v.to_display_string() })
                    .join(&sep),
            ))
        }
        "slice" => {
            let len = snapshot.len();
            let start = relative_index(&arg(&args, 0), len, 0);
            let end = relative_index(&arg(&args, 1), len, len);
            Ok(JsValue::array(
                snapshot.get(start..end.max(start)).unwrap_or_default().to_vec(),
            ))
        }
        "concat" => {
            let mut out = snapshot;
            for a in args {
                match a {
                    JsValue::Array(more) => out.extend(more.borrow().iter().cloned()),
                    other => out.push(other),
                }
            }
            Ok(JsValue::array(out))
        }
        "push" => {
            let mut items = items.borrow_mut();
            items.extend(args);
            Ok(index(items.len()))
        }
        "pop" => Ok(items.borrow_mut().pop().unwrap_or_default()),
        "reverse" => {
            items.borrow_mut().reverse();
            Ok(receiver.clone())
        }
        "sort" => {
            let compare = arg(&args, 0);
            if !compare.is_nullish() && !compare.is_callable() {
                return type_error(
                    "The comparison function must be either a function or undefined",
                );
            }
            let (defined, undefined): (Vec<_>, Vec<_>) = snapshot
                .into_iter()
                .partition(|v| !matches!(v, JsValue::Undefined));
            let mut sorted = merge_sort(interp, defined, &compare)?;
            sorted.extend(undefined);
            *items.borrow_mut() = sorted;
            Ok(receiver.clone())
        }
        "flat" => {
            let depth = match arg(&args, 0) {
                JsValue::Undefined => 1,
                d => d.to_number().max(0.0) as usize,
            };
            Ok(JsValue::array(flatten(snapshot, depth)))
        }
        _ => type_error(format!("{name} is not a function")),
    }
}

fn flatten(items: Vec<JsValue>, depth: usize) -> Vec<JsValue> {
    let mut out = Vec::new();
    for item in items {
        match item {
            JsValue::Array(inner) if depth > 0 => {
                let inner = inner.borrow().clone();
                out.extend(flatten(inner, depth - 1));
            }
            other => out.push(other),
        }
    }
    out
}

/// Stable sort with a user comparator that may throw.
fn merge_sort(
    interp: &mut Interpreter<'_>,
    mut items: Vec<JsValue>,
    compare: &JsValue,
) -> JsResult<Vec<JsValue>> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(interp, items, compare)?;
    let right = merge_sort(interp, right, compare)?;
    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
        let order = if compare.is_callable() {
            let n = interp
                .call_function(compare, JsValue::Undefined, vec![l.clone(), r.clone()])?
                .to_number();
            if n > 0.0 {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        } else {
            l.to_display_string().cmp(&r.to_display_string())
        };
        let next = if order == Ordering::Greater {
            right.next()
        } else {
            left.next()
        };
        out.extend(next);
    }
    out.extend(left);
    out.extend(right);
    Ok(out)
}

/// Index, in UTF-16 code units, of the first `needle` at or after `from`.
fn unit_index_of(haystack: &[u16], needle: &str, from: usize) -> Option<usize> {
    let needle: Vec<u16> = needle.encode_utf16().collect();
    let from = from.min(haystack.len());
    if needle.is_empty() {
        return Some(from);
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle.as_slice())
        .map(|i| from + i)
}

/// Text of a run of UTF-16 code units; an unpaired surrogate becomes U+FFFD.
pub(crate) fn units_to_string(units: &[u16]) -> String {
    String::from_utf16_lossy(units)
}

fn string_method(
    interp: &mut Interpreter<'_>,
    s: &str,
    name: &str,
    args: Vec<JsValue>,
) -> JsResult<JsValue> {
    let text = |i: usize| arg(&args, i).to_display_string();
    let units: Vec<u16> = s.encode_utf16().collect();
    let len = units.len();
    Ok(match name {
        "toUpperCase" => JsValue::String(s.to_uppercase()),
        "toLowerCase" => JsValue::String(s.to_lowercase()),
        "trim" => JsValue::string(s.trim()),
        "toString" => JsValue::string(s),
        "split" => {
            let parts: Vec<JsValue> = match arg(&args, 0) {
                JsValue::Undefined => vec![JsValue::string(s)],
                sep => {
                    let sep = sep.to_display_string();
                    if sep.is_empty() {
                        units
                            .iter()
                            .map(|u| JsValue::String(units_to_string(&[*u])))
                            .collect()
                    } else {
                        s.split(sep.as_str()).map(JsValue::string).collect()
                    }
                }
            };
            let limit = match arg(&args, 1) {
                JsValue::Undefined => parts.len(),
                l => l.to_number().max(0.0) as usize,
            };
            JsValue::array(parts.into_iter().take(limit).collect())
        }
        "includes" => {
            let from = relative_index(&arg(&args, 1), len, 0);
            JsValue::Bool(unit_index_of(&units, &text(0), from).is_some())
        }
        "startsWith" => JsValue::Bool(s.starts_with(&text(0))),
        "endsWith" => JsValue::Bool(s.ends_with(&text(0))),
        "indexOf" => {
            let from = relative_index(&arg(&args, 1), len, 0);
            unit_index_of(&units, &text(0), from).map_or(JsValue::Number(-1.0), |i| {
                JsValue::Number(i as f64)
            })
        }
        "slice" => {
            let start = relative_index(&arg(&args, 0), len, 0);
            let end = relative_index(&arg(&args, 1), len, len);
            JsValue::String(units_to_string(&units[start..end.max(start)]))
        }
        "substring" => {
            let clamp = |v: JsValue, default: usize| match v {
                JsValue::Undefined => default,
                v => {
                    let n = v.to_number();
                    if n.is_nan() || n < 0.0 {
                        0
                    } else {
                        n.min(len as f64) as usize
                    }
                }
            };
            let a = clamp(arg(&args, 0), 0);
            let b = clamp(arg(&args, 1), len);
            let (start, end) = if a <= b { (a, b) } else { (b, a) };
            JsValue::String(units_to_string(&units[start..end]))
        }
        "replace" | "replaceAll" => {
            let pattern = text(0);
            let replacement = arg(&args, 1);
            let mut matches: Vec<(usize, &str)> = s.match_indices(pattern.as_str()).collect();
            if name == "replace" {
                matches.truncate(1);
            }
            let mut out = String::new();
            let mut last = 0;
            for (at, matched) in matches {
                out.push_str(&s[last..at]);
                let piece = if replacement.is_callable() {
                    let offset = JsValue::Number(s[..at].encode_utf16().count() as f64);
                    interp
                        .call_function(
                            &replacement,
                            JsValue::Undefined,
                            vec![JsValue::string(matched), offset, JsValue::string(s)],
                        )?
                        .to_display_string()
                } else {
                    replacement.to_display_string()
                };
                out.push_str(&piece);
                last = at + matched.len();
            }
            out.push_str(&s[last..]);
            JsValue::String(out)
        }
        "charAt" => {
            let i = num(&args, 0);
            let i = if i.is_nan() { 0.0 } else { i.trunc() };
            if i < 0.0 {
                JsValue::string("")
            } else {
                JsValue::String(
                    units
                        .get(i as usize)
                        .map(|u| units_to_string(&[*u]))
                        .unwrap_or_default(),
                )
            }
        }
        "padStart" => {
            let target = num(&args, 0);
            let target = if target.is_nan() { 0 } else { target.max(0.0) as usize };
            let pad = match arg(&args, 1) {
                JsValue::Undefined => " ".to_string(),
                p => p.to_display_string(),
            };
            if target as f64 > MAX_STRING_BYTES {
                return throw("RangeError", "Invalid string length");
            }
            if target <= len || pad.is_empty() {
                JsValue::string(s)
            } else {
                let fill: Vec<u16> = pad.encode_utf16().cycle().take(target - len).collect();
                JsValue::String(units_to_string(&fill) + s)
            }
        }
        "repeat" => {
            let count = num(&args, 0);
            let count = if count.is_nan() { 0.0 } else { count.trunc() };
            if count < 0.0 || count.is_infinite() {
                return throw(
                    "RangeError",
                    format!("Invalid count value: {}", number_to_string(count)),
                );
            }
            if count * s.len() as f64 > MAX_STRING_BYTES {
                return throw("RangeError", "Invalid string length");
            }
            JsValue::String(s.repeat(count as usize))
        }
        _ => return type_error(format!("{name} is not a function")),
    })
}

fn number_method(n: f64, name: &str, args: &[JsValue]) -> JsResult<JsValue> {
    match name {
        "toFixed" => {
            let digits = match arg(args, 0) {
                JsValue::Undefined => 0.0,
                d => d.to_number().trunc(),
            };
            if !(0.0..=100.0).contains(&digits) {
                return throw(
                    "RangeError",
                    "toFixed() digits argument must be between 0 and 100",
                );
            }
            if !n.is_finite() || n.abs() >= 1e21 {
                return Ok(JsValue::String(number_to_string(n)));
            }
            let n = if n == 0.0 { 0.0 } else { n };
            Ok(JsValue::String(format!("{:.*}", digits as usize, n)))
        }
        "toString" => {
            let radix = match arg(args, 0) {
                JsValue::Undefined => 10.0,
                r => r.to_number().trunc(),
            };
            if !(2.0..=36.0).contains(&radix) {
                return throw("RangeError", "toString() radix must be between 2 and 36");
            }
            Ok(JsValue::String(radix_string(n, radix as u32)))
        }
        _ => type_error(format!("{name} is not a function")),
    }
}

/// Integers in bases other than ten; everything else falls back to decimal.
fn radix_string(n: f64, radix: u32) -> String {
    if radix == 10 || !n.is_finite() || n.fract() != 0.0 || n.abs() > 9_007_199_254_740_991.0 {
        return number_to_string(n);
    }
    let mut magnitude = n.abs() as u64;
    if magnitude == 0 {
        return "0".into();
    }
    let mut digits = Vec::new();
    while magnitude > 0 {
        let d = (magnitude % u64::from(radix)) as u32;
        digits.push(char::from_digit(d, radix).unwrap_or('0'));
        magnitude /= u64::from(radix);
    }
    if n < 0.0 {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

fn function_method(
    interp: &mut Interpreter<'_>,
    receiver: &JsValue,
    name: &str,
    args: Vec<JsValue>,
) -> JsResult<JsValue> {
    let mut args = args.into_iter();
    let this = args.next().unwrap_or_default();
    match name {
        "call" => interp.call_function(receiver, this, args.collect()),
        "apply" => {
            let list = match args.next() {
                None | Some(JsValue::Undefined) | Some(JsValue::Null) => Vec::new(),
                Some(JsValue::Array(items)) => items.borrow().clone(),
                Some(_) => return type_error("CreateListFromArrayLike called on non-object"),
            };
            interp.call_function(receiver, this, list)
        }
        _ => type_error(format!("{name} is not a function")),
    }
}

fn promise_method(
    interp: &mut Interpreter<'_>,
    promise: &PromiseRef,
    name: &str,
    args: Vec<JsValue>,
) -> JsResult<JsValue> {
    let result = match name {
        "then" => interp.promise_then(promise, args.first().cloned(), args.get(1).cloned()),
        "catch" => interp.promise_then(promise, None, args.first().cloned()),
        "finally" => interp.promise_finally(promise, args.first().cloned()),
        _ => return type_error(format!("{name} is not a function")),
    };
    Ok(JsValue::Promise(result))
}

fn object_method(object: &ObjectRef, name: &str, args: &[JsValue]) -> JsResult<JsValue> {
    let o = object.borrow();
    match name {
        "hasOwnProperty" => Ok(JsValue::Bool(
            o.contains(&arg(args, 0).to_property_key()),
        )),
        "toString" if o.kind == ObjectKind::Error => Ok(JsValue::String(error_summary(&o))),
        "toString" => Ok(JsValue::string("[object Object]")),
        _ => type_error(format!("{name} is not a function")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn radix_conversion() {
        assert_eq!(radix_string(255.0, 16), "ff");
        assert_eq!(radix_string(-5.0, 2), "-101");
        assert_eq!(radix_string(1.5, 2), "1.5");
    }

    #[test]
    fn relative_indices_clamp() {
        assert_eq!(relative_index(&JsValue::Number(-2.0), 5, 0), 3);
        assert_eq!(relative_index(&JsValue::Number(9.0), 5, 0), 5);
        assert_eq!(relative_index(&JsValue::Undefined, 5, 5), 5);
    }

    #[test]
    fn string_positions_count_utf16_units() {
        let units: Vec<u16> = "😀a😀a".encode_utf16().collect();
        assert_eq!(unit_index_of(&units, "a", 0), Some(2));
        assert_eq!(unit_index_of(&units, "a", 3), Some(5));
        assert_eq!(unit_index_of(&units, "", 9), Some(6));
        assert_eq!(unit_index_of(&units, "b", 0), None);
        assert_eq!(units_to_string(&units[0..2]), "😀");
        assert_eq!(units_to_string(&units[0..1]), "\u{FFFD}");
    }

    #[test]
    fn method_tables_are_per_type() {
        assert!(has_method(&JsValue::array(vec![]), "map"));
        assert!(!has_method(&JsValue::string("x"), "map"));
        assert!(has_method(&JsValue::Number(1.0), "toFixed"));
        assert!(!has_method(&JsValue::Null, "toString"));
    }

    #[test]
    fn every_allow_listed_global_is_present() {
        let names: Vec<_> = globals().into_iter().map(|(n, _)| n).collect();
        for expected in ["Math", "JSON", "Promise", "console", "RangeError", "parseInt"] {
            assert!(names.contains(&expected), "{expected} missing");
        }
    }
}
