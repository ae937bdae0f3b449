use binding_sandbox as sandbox;
use sandbox::{ClassifierMode, DataTree, EvalConfig, Registry, Worker};
use serde_json::json;

fn worker(mode: ClassifierMode) -> Worker {
    let config = EvalConfig {
        classifier: mode,
        ..EvalConfig::default()
    };
    Worker::new(config, Registry::with_builtins())
}

#[test]
fn test_value_returning_functions_are_sync() {
    for mode in [ClassifierMode::Static, ClassifierMode::Trial] {
        let w = worker(mode);
        assert!(!w.is_async("() => 1 + 1", &DataTree::new()));
        assert!(!w.is_async("function () { return [1, 2].map(x => x * 2) }", &DataTree::new()));
    }
}

#[test]
fn test_promise_returning_functions_are_async() {
    for mode in [ClassifierMode::Static, ClassifierMode::Trial] {
        let w = worker(mode);
        assert!(w.is_async("() => Promise.resolve(1)", &DataTree::new()));
        assert!(w.is_async("async function () { return 1 }", &DataTree::new()));
    }
}

#[test]
fn test_trigger_names_make_a_binding_async() {
    let w = worker(ClassifierMode::Static);
    assert!(w.is_async("() => { if (false) { resetWidget('Table1') } }", &DataTree::new()));
    assert!(w.is_async("{{ copyToClipboard }}", &DataTree::new()));
}

#[test]
fn test_trial_run_follows_context_helpers() {
    let mut context = DataTree::new();
    context.insert("Api1".into(), json!({ "data": [1, 2] }));
    let w = worker(ClassifierMode::Trial);
    assert!(!w.is_async("() => Api1.data.length", &context));
    assert!(w.is_async("() => ({ then(done) { done(Api1.data) } })", &context));
}

#[test]
fn test_escaped_bindings_are_unescaped_before_parsing() {
    let w = worker(ClassifierMode::Static);
    assert!(w.is_async(r#"() => fetchIt(\"x\").then(r => r)"#, &DataTree::new()));
}
