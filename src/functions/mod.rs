use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use crate::errors::Result;

/// Trait for helper functions merged into every binding's scope.
pub trait Function: Send + Sync {
    fn name(&self) -> &'static str;
    fn arity(&self) -> std::ops::RangeInclusive<usize>;
    fn call(&self, args: &[Value]) -> Result<Value>;
}

/// Thread-safe function registry; the additional library of a worker.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<HashMap<&'static str, Arc<dyn Function>>>,
}

impl Registry {
    pub fn new() -> Self { Self::default() }

    pub fn with_builtins() -> Self {
        let mut map: HashMap<&'static str, Arc<dyn Function>> = HashMap::new();
        map.insert("lower", Arc::new(builtins::Lower));
        map.insert("upper", Arc::new(builtins::Upper));
        map.insert("first", Arc::new(builtins::First));
        map.insert("last", Arc::new(builtins::Last));
        map.insert("uniq", Arc::new(builtins::Uniq));
        map.insert("compact", Arc::new(builtins::Compact));
        map.insert("defaultTo", Arc::new(builtins::DefaultTo));
        map.insert("fromJson", Arc::new(builtins::FromJson));
        Self { inner: Arc::new(map) }
    }

    pub fn register<F: Function + 'static>(&mut self, f: F) {
        let mut_map = Arc::make_mut(&mut self.inner);
        mut_map.insert(f.name(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Function>> {
        self.inner.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    /// Entries in name order, so scopes are built deterministically.
    pub fn entries(&self) -> Vec<(&'static str, Arc<dyn Function>)> {
        let mut out: Vec<_> = self.inner.iter().map(|(k, v)| (*k, v.clone())).collect();
        out.sort_by_key(|(k, _)| *k);
        out
    }
}

pub mod builtins {
    use super::*;
    use crate::errors::SandboxError;
    use itertools::Itertools;
    use serde_json::Value;

    pub struct Lower;
    impl Function for Lower {
        fn name(&self) -> &'static str { "lower" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            let s = args.first().cloned().unwrap_or(Value::Null);
            Ok(match s {
                Value::String(t) => Value::String(t.to_lowercase()),
                other => other,
            })
        }
    }

    pub struct Upper;
    impl Function for Upper {
        fn name(&self) -> &'static str { "upper" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            let s = args.first().cloned().unwrap_or(Value::Null);
            Ok(match s {
                Value::String(t) => Value::String(t.to_uppercase()),
                other => other,
            })
        }
    }

    /// First element of an array; null otherwise.
    pub struct First;
    impl Function for First {
        fn name(&self) -> &'static str { "first" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            Ok(match args.first() {
                Some(Value::Array(a)) => a.first().cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            })
        }
    }

    pub struct Last;
    impl Function for Last {
        fn name(&self) -> &'static str { "last" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            Ok(match args.first() {
                Some(Value::Array(a)) => a.last().cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            })
        }
    }

    /// Deduplicate an array by JSON identity; identity for non-arrays.
    pub struct Uniq;
    impl Function for Uniq {
        fn name(&self) -> &'static str { "uniq" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            Ok(match args.first() {
                Some(Value::Array(a)) => Value::Array(
                    a.iter()
                        .cloned()
                        .unique_by(|x| serde_json::to_string(x).unwrap_or_default())
                        .collect(),
                ),
                Some(other) => other.clone(),
                None => Value::Null,
            })
        }
    }

    /// Drop falsy entries from an array.
    pub struct Compact;
    impl Function for Compact {
        fn name(&self) -> &'static str { "compact" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            match args.first() {
                Some(Value::Array(a)) => Ok(Value::Array(
                    a.iter().filter(|v| json_truthy(v)).cloned().collect(),
                )),
                _ => Err(SandboxError::Library {
                    class: "TypeError",
                    message: "compact expects an array".into(),
                }),
            }
        }
    }

    /// `value` unless it is null or an empty array, else `fallback`.
    pub struct DefaultTo;
    impl Function for DefaultTo {
        fn name(&self) -> &'static str { "defaultTo" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 2..=2 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            let value = args.first().unwrap_or(&Value::Null);
            let fallback = args.get(1).cloned().unwrap_or(Value::Null);
            Ok(match value {
                Value::Null => fallback,
                Value::Array(a) if a.is_empty() => fallback,
                _ => value.clone(),
            })
        }
    }

    /// Parse a JSON string, falling back to the raw string when it is not JSON.
    pub struct FromJson;
    impl Function for FromJson {
        fn name(&self) -> &'static str { "fromJson" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            let raw = args.first().and_then(|v| v.as_str()).unwrap_or("null");
            Ok(serde_json::from_str::<Value>(raw)
                .unwrap_or_else(|_| Value::String(raw.to_string())))
        }
    }

    fn json_truthy(v: &Value) -> bool {
        match v {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn builtins_are_registered_by_name() {
        let reg = Registry::with_builtins();
        let names: Vec<_> = reg.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            names,
            vec!["compact", "defaultTo", "first", "fromJson", "last", "lower", "uniq", "upper"]
        );
    }

    #[test]
    fn uniq_and_default_to() {
        let reg = Registry::with_builtins();
        let uniq = reg.get("uniq").unwrap();
        assert_eq!(uniq.call(&[json!([1, 1, 2, 2, 3])]).unwrap(), json!([1, 2, 3]));
        let once = uniq.call(&[json!([1, 1, 2])]).unwrap();
        assert_eq!(uniq.call(&[once.clone()]).unwrap(), once);

        let default_to = reg.get("defaultTo").unwrap();
        assert_eq!(default_to.call(&[json!(null), json!({"x": 1})]).unwrap(), json!({"x": 1}));
        assert_eq!(default_to.call(&[json!([]), json!(0)]).unwrap(), json!(0));
        assert_eq!(default_to.call(&[json!("a"), json!(0)]).unwrap(), json!("a"));
    }

    #[test]
    fn compact_rejects_non_arrays() {
        let reg = Registry::with_builtins();
        let compact = reg.get("compact").unwrap();
        assert_eq!(compact.call(&[json!([0, 1, "", "a", null])]).unwrap(), json!([1, "a"]));
        assert!(compact.call(&[json!("nope")]).is_err());
    }

    #[test]
    fn custom_functions_can_be_registered() {
        struct Double;
        impl Function for Double {
            fn name(&self) -> &'static str { "double" }
            fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
            fn call(&self, args: &[Value]) -> Result<Value> {
                Ok(json!(args[0].as_f64().unwrap_or(0.0) * 2.0))
            }
        }
        let mut reg = Registry::new();
        reg.register(Double);
        assert!(reg.contains("double"));
        assert_eq!(reg.get("double").unwrap().call(&[json!(2)]).unwrap(), json!(4.0));
    }
}
