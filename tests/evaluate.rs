use binding_sandbox as sandbox;
use pretty_assertions::assert_eq;
use sandbox::{
    DataTree, Diagnostic, EvalConfig, EvaluationResult, Registry, Severity, Worker,
};
use serde_json::{json, Value};

fn worker() -> Worker {
    Worker::new(EvalConfig::default(), Registry::with_builtins())
}

fn tree(value: Value) -> DataTree {
    match value {
        Value::Object(map) => map,
        _ => panic!("context must be an object"),
    }
}

fn eval(binding: &str) -> EvaluationResult {
    worker().evaluate(binding, &DataTree::new(), None)
}

fn messages(out: &EvaluationResult) -> Vec<&str> {
    out.errors.iter().map(Diagnostic::message).collect()
}

#[test]
fn test_allow_listed_expressions() {
    let context = tree(json!({
        "Table1": { "data": [
            { "name": "ada", "active": true },
            { "name": "bob", "active": false },
            { "name": "cy", "active": true }
        ]}
    }));
    let out = worker().evaluate(
        "Table1.data.filter(r => r.active).map(r => r.name.toUpperCase()).join(', ')",
        &context,
        None,
    );
    assert_eq!(out, EvaluationResult::new(Some(json!("ADA, CY")), vec![]));
}

#[test]
fn test_language_features() {
    let cases = [
        ("`Hi ${'there'}!`", json!("Hi there!")),
        ("Math.max(...[1, 5, 3])", json!(5)),
        ("[3, 1, 2].sort()", json!([1, 2, 3])),
        ("[1, [2, [3]]].flat()", json!([1, 2, [3]])),
        ("'a-b-c'.split('-')", json!(["a", "b", "c"])),
        ("parseInt('42px')", json!(42)),
        ("(3.14159).toFixed(2)", json!("3.14")),
        ("Object.keys({ b: 1, a: 2 })", json!(["b", "a"])),
        ("JSON.stringify({ a: 1, b: [1, 2] })", json!(r#"{"a":1,"b":[1,2]}"#)),
        ("0.1 + 0.2", json!(0.30000000000000004)),
        ("null ?? 'fallback'", json!("fallback")),
        ("typeof missingThing", json!("undefined")),
        ("[1, 2, 3].reduce((sum, x) => sum + x, 0)", json!(6)),
        ("({ a: 1, ...{ b: 2 } })", json!({ "a": 1, "b": 2 })),
        ("[undefined, () => 1, NaN]", json!([null, null, null])),
    ];
    for (binding, expected) in cases {
        let out = eval(binding);
        assert_eq!(out.result, Some(expected), "{binding}");
        assert!(out.errors.is_empty(), "{binding}: {:?}", out.errors);
    }
}

#[test]
fn test_statements_inside_functions() {
    let binding = "(() => {
        let total = 0;
        for (const x of [1, 2, 3, 4]) {
            if (x % 2 === 0) continue;
            total += x;
        }
        for (let i = 0; i < 3; i++) { total += i }
        try { null.x } catch (e) { return [total, e.message] }
    })()";
    let out = eval(binding);
    assert_eq!(
        out.result,
        Some(json!([7, "Cannot read properties of null (reading 'x')"]))
    );
}

#[test]
fn test_undefined_result_is_omitted() {
    let out = eval("({}).missing?.deep");
    assert_eq!(out.result, None);
    assert!(out.errors.is_empty());
    let wire = serde_json::to_value(&out).unwrap();
    assert_eq!(wire, json!({ "errors": [] }));
}

#[test]
fn test_undeclared_identifier_reports_lint_and_runtime() {
    let out = eval("wrongJS");
    assert_eq!(out.result, None);
    assert_eq!(
        messages(&out),
        vec!["'wrongJS' is not defined.", "ReferenceError: wrongJS is not defined"]
    );
    assert!(out.errors.iter().all(|e| e.original_binding() == "wrongJS"));
    let Diagnostic::Lint(lint) = &out.errors[0] else {
        panic!("expected a lint diagnostic first");
    };
    assert_eq!(lint.code, "W117");
    assert_eq!(lint.severity, Severity::Error);
}

#[test]
fn test_blocked_capabilities_are_not_functions() {
    for name in ["setTimeout", "fetch", "localStorage", "eval"] {
        let out = eval(&format!("{name}()"));
        assert_eq!(out.result, None);
        assert_eq!(messages(&out), vec![format!("TypeError: {name} is not a function")]);
    }
}

#[test]
fn test_repeated_evaluation_is_identical() {
    let w = worker();
    let context = tree(json!({ "Input1": { "text": "x" } }));
    let first = w.evaluate("Input1.text + missing", &context, None);
    let second = w.evaluate("Input1.text + missing", &context, None);
    assert_eq!(first, second);
}

#[test]
fn test_legacy_version_unescapes_binding_text() {
    let mut w = worker();
    let out = w.evaluate(r#"\"Hello!\""#, &DataTree::new(), None);
    assert_eq!(out.result, Some(json!("Hello!")));

    let legacy = w.evaluate(r#""a\\nb""#, &DataTree::new(), None);
    w.set_evaluation_version(2);
    let current = w.evaluate(r#""a\nb""#, &DataTree::new(), None);
    assert_eq!(current.result, Some(json!("a\nb")));
    assert_eq!(legacy.result, current.result);
}

#[test]
fn test_callback_dispatch() {
    let args = [json!({ "value": "x" }), json!("1")];
    let out = worker().evaluate("(a,b) => a.value + b", &DataTree::new(), Some(&args));
    assert_eq!(out, EvaluationResult::new(Some(json!("x1")), vec![]));
}

#[test]
fn test_nullish_callback_binding() {
    let out = worker().evaluate("null", &DataTree::new(), Some(&[]));
    assert_eq!(out.result, None);
    assert!(out.errors.is_empty());
}

#[test]
fn test_context_is_not_mutated() {
    let w = worker();
    let context = tree(json!({ "Input1": { "text": "Hello" } }));
    let out = w.evaluate(
        "(() => { Input1.text = 'changed'; return Input1.text })()",
        &context,
        None,
    );
    assert_eq!(out.result, Some(json!("changed")));
    assert_eq!(context["Input1"], json!({ "text": "Hello" }));
    let again = w.evaluate("Input1.text", &context, None);
    assert_eq!(again.result, Some(json!("Hello")));
}

#[test]
fn test_scope_priority() {
    let w = worker();
    let shadowing = tree(json!({ "upper": 5, "Math": "not math" }));
    assert_eq!(w.evaluate("upper", &shadowing, None).result, Some(json!(5)));
    assert_eq!(w.evaluate("Math", &shadowing, None).result, Some(json!("not math")));
    assert_eq!(
        w.evaluate("upper('a')", &DataTree::new(), None).result,
        Some(json!("A"))
    );
    let locals = tree(json!({ "ARGUMENTS": "context" }));
    let out = w.evaluate("() => ARGUMENTS", &locals, Some(&[json!(7)]));
    assert_eq!(out.result, Some(json!([7])));
}

#[test]
fn test_trigger_in_sync_field() {
    let out = eval("showAlert('hi', 'info')");
    assert_eq!(out.result, None);
    assert_eq!(
        messages(&out),
        vec!["ActionCalledInSyncFieldError: Found a reference to showAlert during evaluation. Sync fields cannot execute framework actions. Please remove any direct/indirect references to showAlert and try again."]
    );
}

#[test]
fn test_lint_positions_are_relative_to_the_binding() {
    let out = eval("1 +\n  wrongJS");
    let Diagnostic::Lint(lint) = &out.errors[0] else {
        panic!("expected a lint diagnostic");
    };
    assert_eq!((lint.line, lint.ch), (2, 3));
    assert_eq!(lint.error_segment, "  wrongJS");
    assert_eq!(lint.variables, [Some("wrongJS".to_string()), None, None, None]);
    assert!(lint.raw.contains("const result = 1 +\n  wrongJS"));

    let first_line = eval("[1, nope]");
    let Diagnostic::Lint(lint) = &first_line.errors[0] else {
        panic!("expected a lint diagnostic");
    };
    assert_eq!((lint.line, lint.ch), (1, 5));
}

#[test]
fn test_redeclaration_warning_keeps_the_result() {
    let out = eval("(() => { var a = 1; var a = 2; return a })()");
    assert_eq!(out.result, Some(json!(2)));
    assert_eq!(messages(&out), vec!["'a' is already defined."]);
    assert_eq!(out.errors[0].severity(), Severity::Warning);
}

#[test]
fn test_syntax_errors() {
    let out = eval("(1 +");
    assert_eq!(out.result, None);
    assert_eq!(out.errors.len(), 2);
    let Diagnostic::Lint(lint) = &out.errors[0] else {
        panic!("expected a lint diagnostic");
    };
    assert_eq!(lint.code, "E000");
    assert_eq!(
        out.errors[1].message(),
        format!("SyntaxError: {}", lint.error_message)
    );
}

#[test]
fn test_thrown_values() {
    assert_eq!(
        messages(&eval("(() => { throw new RangeError('too big') })()")),
        vec!["RangeError: too big"]
    );
    assert_eq!(
        messages(&eval("(() => { throw 'plain' })()")),
        vec!["Error: plain"]
    );
}

#[test]
fn test_constant_reassignment() {
    let out = eval("(() => { const a = 1; a = 2; return a })()");
    assert_eq!(
        messages(&out),
        vec![
            "Attempting to override 'a' which is a constant.",
            "TypeError: Assignment to constant variable."
        ]
    );
}

#[test]
fn test_resource_limits() {
    let config = EvalConfig {
        max_loop_iterations: 1000,
        ..EvalConfig::default()
    };
    let w = Worker::new(config, Registry::new());
    let out = w.evaluate("(() => { while (true) {} })()", &DataTree::new(), None);
    assert_eq!(messages(&out), vec!["RangeError: Loop iteration limit of 1000 exceeded"]);

    let out = w.evaluate("'ab'.repeat(1e12)", &DataTree::new(), None);
    assert_eq!(out.result, None);
}

#[test]
fn test_call_depth_limit() {
    let recurse = "(() => { const f = n => n === 0 ? 0 : 1 + f(n - 1); return f(N) })()";
    let out = eval(&recurse.replace('N', "100"));
    assert_eq!(out, EvaluationResult::new(Some(json!(100)), vec![]));

    let out = eval(&recurse.replace('N', "100000"));
    assert_eq!(out.result, None);
    assert_eq!(messages(&out), vec!["RangeError: Maximum call stack size exceeded"]);
}

#[test]
fn test_deeply_nested_bindings() {
    let parens = format!("{}1{}", "(".repeat(150), ")".repeat(150));
    assert_eq!(eval(&parens), EvaluationResult::new(Some(json!(1)), vec![]));

    let arrays = format!("{}1{}", "[".repeat(1000), "]".repeat(1000));
    let out = eval(&arrays);
    assert_eq!(out.result, None);
    let Diagnostic::Lint(lint) = &out.errors[0] else {
        panic!("expected a lint diagnostic first");
    };
    assert_eq!(lint.code, "E000");
    assert_eq!(
        out.errors[1].message(),
        "SyntaxError: Maximum nesting depth of 256 exceeded"
    );

    let chain = format!("1{}", " + 1".repeat(500));
    assert_eq!(eval(&chain).result, None);
}

#[test]
fn test_named_function_expressions_recurse() {
    let out = eval("(function fact(n) { return n <= 1 ? 1 : n * fact(n - 1) })(5)");
    assert_eq!(out, EvaluationResult::new(Some(json!(120)), vec![]));
}

#[test]
fn test_var_is_function_scoped() {
    let out = eval(
        "(() => { if (true) { var a = 1 } for (var i = 0; i < 3; i++) {} return [a, i] })()",
    );
    assert_eq!(out, EvaluationResult::new(Some(json!([1, 3])), vec![]));

    let out = eval("(() => { const read = () => late; var late = 'set'; return read() })()");
    assert_eq!(out, EvaluationResult::new(Some(json!("set")), vec![]));

    let out = eval("(() => { (() => { var inner = 1 })(); return typeof inner })()");
    assert_eq!(out.result, Some(json!("undefined")));
}

#[test]
fn test_compound_assignment_evaluates_its_target_once() {
    let binding = "(() => {
        let calls = 0;
        const o = { a: 1 };
        const key = () => { calls += 1; return 'a' };
        o[key()] += 1;
        o[key()]++;
        return [o.a, calls];
    })()";
    assert_eq!(eval(binding).result, Some(json!([3, 2])));
}

#[test]
fn test_strings_count_utf16_units() {
    let cases = [
        ("'😀a'.length", json!(3)),
        ("'😀a'[2]", json!("a")),
        ("'😀a'.indexOf('a')", json!(2)),
        ("'😀a'.slice(0, 2)", json!("😀")),
        ("'😀a'.charAt(2)", json!("a")),
        ("'x'.padStart(3, '😀')", json!("😀x")),
        ("String(1e21)", json!("1e+21")),
        ("`${1e-7}`", json!("1e-7")),
        ("(123.456).toString()", json!("123.456")),
    ];
    for (binding, expected) in cases {
        assert_eq!(eval(binding).result, Some(expected), "{binding}");
    }
}

#[test]
fn test_library_helpers() {
    let out = eval("defaultTo(null, 'x')");
    assert_eq!(out.result, Some(json!("x")));
    let out = eval("upper()");
    assert_eq!(out.result, None);
    assert_eq!(out.errors.len(), 1);
    assert!(out.errors[0].message().starts_with("TypeError: upper expects"));
}

#[test]
fn test_convenience_helpers() {
    assert_eq!(sandbox::evaluate_or_null("[1, 2].length", &DataTree::new()), json!(2));
    assert_eq!(sandbox::evaluate_or_null("nothingHere", &DataTree::new()), Value::Null);
}
