//! Property-based checks over generated bindings.

use binding_sandbox as sandbox;
use proptest::prelude::*;
use sandbox::{DataTree, EvalConfig, Registry, Worker};
use serde_json::json;

fn worker() -> Worker {
    Worker::new(EvalConfig::default(), Registry::with_builtins())
}

/// Identifiers that cannot collide with globals, triggers or keywords.
fn arb_unknown_ident() -> impl Strategy<Value = String> {
    "[a-z]{3,8}".prop_map(|s| format!("zz_{s}"))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn integer_arithmetic_matches(a in -1000i64..1000, b in -1000i64..1000, c in 1i64..50) {
        let binding = format!("({a}) + ({b}) * ({c})");
        let out = worker().evaluate(&binding, &DataTree::new(), None);
        prop_assert_eq!(out.result, Some(json!(a + b * c)));
        prop_assert!(out.errors.is_empty());
    }

    #[test]
    fn string_literals_round_trip(s in "[a-zA-Z0-9 _.,!?-]{0,24}") {
        let binding = format!("'{s}'");
        let out = worker().evaluate(&binding, &DataTree::new(), None);
        prop_assert_eq!(out.result, Some(json!(s)));
    }

    #[test]
    fn undeclared_names_are_always_reported(name in arb_unknown_ident()) {
        let out = worker().evaluate(&name, &DataTree::new(), None);
        prop_assert_eq!(out.result, None);
        let messages: Vec<&str> = out.errors.iter().map(|e| e.message()).collect();
        let lint = format!("'{name}' is not defined.");
        let runtime = format!("ReferenceError: {name} is not defined");
        prop_assert_eq!(messages, vec![lint.as_str(), runtime.as_str()]);
        prop_assert!(out.errors.iter().all(|e| e.original_binding() == name));
    }

    #[test]
    fn evaluation_is_total_and_repeatable(binding in "[ -~]{0,40}") {
        let w = worker();
        let first = w.evaluate(&binding, &DataTree::new(), None);
        let second = w.evaluate(&binding, &DataTree::new(), None);
        prop_assert_eq!(&first, &second);
        if first.has_runtime_error() {
            prop_assert_eq!(first.result, None);
        }
    }

    #[test]
    fn context_values_come_back_unchanged(n in any::<i32>(), s in "[a-z]{0,10}", flag in any::<bool>()) {
        let entity = json!({ "n": n, "s": s, "flag": flag, "list": [n, s, flag] });
        let mut context = DataTree::new();
        context.insert("Widget1".into(), entity.clone());
        let out = worker().evaluate("Widget1", &context, None);
        prop_assert_eq!(out.result, Some(entity));
    }
}
