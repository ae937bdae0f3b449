//! Decide whether a binding belongs on the sync or the async path.

use tracing::debug;

use crate::ast::{Expr, MemberProp};
use crate::context::{ClassifierMode, DataTree, EvalConfig, ExecutionMode};
use crate::environment::Environment;
use crate::escape::unescape_js;
use crate::functions::Registry;
use crate::interpreter::Interpreter;
use crate::parser::parse_async_expression;
use crate::triggers::{self, NoopDispatcher};
use crate::value::JsValue;

pub fn is_async(
    env: &Environment,
    config: &EvalConfig,
    binding: &str,
    context: &DataTree,
    library: &Registry,
) -> bool {
    if let Some(trigger) = triggers::mentioned_in(binding) {
        debug!(trigger, "async: mentions a trigger");
        return true;
    }
    let text = if config.unescapes_strings() {
        unescape_js(binding)
    } else {
        binding.to_string()
    };
    let expr = match parse_async_expression(&text) {
        Ok(expr) => expr,
        Err(err) => {
            debug!(error = %err.message, "sync: binding does not parse");
            return false;
        }
    };
    if expr.any(&is_async_syntax) {
        debug!("async: async syntax");
        return true;
    }
    if config.classifier == ClassifierMode::Trial {
        return trial_run(env, config, &expr, context, library);
    }
    false
}

/// Constructs that only make sense in asynchronous code. Any reference to
/// `Promise` counts, so an alias such as `const P = Promise` is caught too.
fn is_async_syntax(expr: &Expr) -> bool {
    match expr {
        Expr::Function(def) => def.is_async,
        Expr::Await(_) => true,
        Expr::Ident { name, .. } => name == "Promise",
        Expr::Member { property, .. } => {
            matches!(property, MemberProp::Named(p) if matches!(p.as_str(), "then" | "catch" | "finally"))
        }
        _ => false,
    }
}

/// Run the binding with triggers disarmed, invoke it when it is a function,
/// and look at what comes back.
fn trial_run(
    env: &Environment,
    config: &EvalConfig,
    expr: &Expr,
    context: &DataTree,
    library: &Registry,
) -> bool {
    let dispatcher = NoopDispatcher;
    let mut interp = Interpreter::new(
        env,
        library,
        &dispatcher,
        config,
        ExecutionMode::Trial,
        context,
        Vec::new(),
    );
    let outcome = interp.eval_expression(expr).and_then(|value| {
        if value.is_callable() {
            interp.call_function(&value, JsValue::Undefined, Vec::new())
        } else {
            Ok(value)
        }
    });
    let verdict = match outcome {
        Ok(value) => interp.trigger_seen() || is_promise_like(&value),
        Err(_) => false,
    };
    debug!(verdict, "trial run finished");
    verdict
}

fn is_promise_like(value: &JsValue) -> bool {
    match value {
        JsValue::Promise(_) => true,
        JsValue::Object(o) => o.borrow().get("then").is_some_and(JsValue::is_callable),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(binding: &str, mode: ClassifierMode) -> bool {
        let config = EvalConfig {
            classifier: mode,
            ..EvalConfig::default()
        };
        is_async(
            &Environment::new(),
            &config,
            binding,
            &DataTree::new(),
            &Registry::with_builtins(),
        )
    }

    #[test]
    fn plain_functions_are_sync() {
        assert!(!classify("() => 1", ClassifierMode::Static));
        assert!(!classify("() => 1", ClassifierMode::Trial));
        assert!(!classify("[1, 2].map(x => x + 1)", ClassifierMode::Static));
    }

    #[test]
    fn trigger_names_are_async_anywhere() {
        assert!(classify("() => false && showAlert('x')", ClassifierMode::Static));
        assert!(classify("'navigateTo'", ClassifierMode::Static));
    }

    #[test]
    fn async_syntax() {
        assert!(classify("async () => 1", ClassifierMode::Static));
        assert!(classify("() => new Promise(r => r(1))", ClassifierMode::Static));
        assert!(classify("() => Promise.resolve(1)", ClassifierMode::Static));
        assert!(classify("() => api.run().then(x => x)", ClassifierMode::Static));
    }

    #[test]
    fn aliased_promise_is_async() {
        let src = "() => { const P = Promise; return P.resolve(1) }";
        assert!(classify(src, ClassifierMode::Static));
        assert!(!classify("() => ({ promised: 1 }).promised", ClassifierMode::Static));
    }

    #[test]
    fn trial_run_sees_returned_thenables() {
        let src = "() => ({ then: (resolve) => resolve(1) })";
        assert!(!classify(src, ClassifierMode::Static));
        assert!(classify(src, ClassifierMode::Trial));
    }

    #[test]
    fn unparseable_and_throwing_bindings_are_sync() {
        assert!(!classify("(1 +", ClassifierMode::Trial));
        assert!(!classify("() => missing()", ClassifierMode::Trial));
    }
}
