use std::cmp::Ordering;
use std::rc::Rc;

use crate::value::JsValue;

/// Relational comparison (`<`, `<=`, `>`, `>=`). `None` when either side is NaN.
pub fn cmp_values(a: &JsValue, b: &JsValue) -> Option<Ordering> {
    match (a, b) {
        (JsValue::String(sa), JsValue::String(sb)) => Some(sa.cmp(sb)),
        _ => {
            let prim_a = to_primitive(a);
            let prim_b = to_primitive(b);
            if let (JsValue::String(sa), JsValue::String(sb)) = (&prim_a, &prim_b) {
                return Some(sa.cmp(sb));
            }
            prim_a.to_number().partial_cmp(&prim_b.to_number())
        }
    }
}

/// Arrays and objects compare through their string form.
pub(crate) fn to_primitive(v: &JsValue) -> JsValue {
    match v {
        JsValue::Array(_) | JsValue::Object(_) | JsValue::Function(_) | JsValue::Promise(_) => {
            JsValue::String(v.to_display_string())
        }
        other => other.clone(),
    }
}

/// `===`
pub fn strict_equals(a: &JsValue, b: &JsValue) -> bool {
    match (a, b) {
        (JsValue::Undefined, JsValue::Undefined) | (JsValue::Null, JsValue::Null) => true,
        (JsValue::Bool(x), JsValue::Bool(y)) => x == y,
        (JsValue::Number(x), JsValue::Number(y)) => x == y,
        (JsValue::String(x), JsValue::String(y)) => x == y,
        (JsValue::Array(x), JsValue::Array(y)) => Rc::ptr_eq(x, y),
        (JsValue::Object(x), JsValue::Object(y)) => Rc::ptr_eq(x, y),
        (JsValue::Function(x), JsValue::Function(y)) => Rc::ptr_eq(x, y),
        (JsValue::Promise(x), JsValue::Promise(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

/// `==`
pub fn loose_equals(a: &JsValue, b: &JsValue) -> bool {
    match (a, b) {
        (x, y) if x.is_nullish() || y.is_nullish() => x.is_nullish() && y.is_nullish(),
        (JsValue::Number(_), JsValue::String(_))
        | (JsValue::String(_), JsValue::Number(_))
        | (JsValue::Bool(_), _)
        | (_, JsValue::Bool(_)) => {
            if matches!(a, JsValue::Bool(_)) && matches!(b, JsValue::Bool(_)) {
                return strict_equals(a, b);
            }
            loose_equals(&JsValue::Number(a.to_number()), &JsValue::Number(b.to_number()))
        }
        (JsValue::Array(_) | JsValue::Object(_), JsValue::Number(_) | JsValue::String(_))
        | (JsValue::Number(_) | JsValue::String(_), JsValue::Array(_) | JsValue::Object(_)) => {
            loose_equals(&to_primitive(a), &to_primitive(b))
        }
        _ => strict_equals(a, b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_compare_lexicographically() {
        let a = JsValue::string("apple");
        let b = JsValue::string("banana");
        assert_eq!(cmp_values(&a, &b), Some(Ordering::Less));
    }

    #[test]
    fn mixed_comparisons_go_through_numbers() {
        assert_eq!(
            cmp_values(&JsValue::Number(10.0), &JsValue::string("9")),
            Some(Ordering::Greater)
        );
        assert_eq!(cmp_values(&JsValue::Number(1.0), &JsValue::Undefined), None);
    }

    #[test]
    fn loose_equality_coerces() {
        assert!(loose_equals(&JsValue::Number(1.0), &JsValue::string("1")));
        assert!(loose_equals(&JsValue::Null, &JsValue::Undefined));
        assert!(!loose_equals(&JsValue::Null, &JsValue::Number(0.0)));
        assert!(loose_equals(&JsValue::Bool(true), &JsValue::Number(1.0)));
        assert!(!strict_equals(&JsValue::Number(1.0), &JsValue::string("1")));
        assert!(!strict_equals(
            &JsValue::Number(f64::NAN),
            &JsValue::Number(f64::NAN)
        ));
    }
}
