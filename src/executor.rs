use serde_json::Value;
use tracing::debug;

use crate::context::{DataTree, EvalConfig, ExecutionMode};
use crate::diagnostics::{Diagnostic, EvaluationResult};
use crate::environment::Environment;
use crate::functions::Registry;
use crate::interpreter::{export, Interpreter};
use crate::lint;
use crate::template::{ParsedSource, ScriptKind};
use crate::triggers::TriggerDispatcher;
use crate::value::{self, describe_thrown, JsValue, Thrown};

pub const THIS_CONTEXT: &str = "THIS_CONTEXT";
pub const ARGUMENTS: &str = "ARGUMENTS";

/// Evaluate a data binding synchronously.
///
/// With `callback_args` the binding must evaluate to a function, which is
/// applied to the arguments. Failures are reported as diagnostics; this never
/// returns an error.
pub fn evaluate(
    env: &Environment,
    config: &EvalConfig,
    binding: &str,
    context: &DataTree,
    library: &Registry,
    dispatcher: &dyn TriggerDispatcher,
    callback_args: Option<&[Value]>,
) -> EvaluationResult {
    let kind = match callback_args {
        Some(_) => ScriptKind::Callback,
        None => ScriptKind::Sync,
    };
    debug!(
        len = binding.len(),
        ?kind,
        version = config.evaluation_version,
        "evaluate"
    );
    let source = ParsedSource::new(kind, binding, config.unescapes_strings());
    let mut errors = lint::lint(&source, &known_names(env, library, context, kind));

    let program = match &source.program {
        Ok(program) => program,
        Err(err) => {
            errors.push(Diagnostic::runtime(
                &source,
                format!("SyntaxError: {}", err.message),
            ));
            return EvaluationResult::new(None, errors);
        }
    };

    let locals = callback_args.map(callback_locals).unwrap_or_default();
    let mut interp = Interpreter::new(
        env,
        library,
        dispatcher,
        config,
        ExecutionMode::Sync,
        context,
        locals,
    );
    let outcome = interp.run_program(program);
    interp.run_microtasks();
    match outcome.and_then(|v| export(&v)) {
        Ok(result) => EvaluationResult::new(result, errors),
        Err(Thrown(err)) => {
            let message = describe_thrown(&err);
            debug!(%message, "binding threw");
            errors.push(Diagnostic::runtime(&source, message));
            EvaluationResult::new(None, errors)
        }
    }
}

/// The name check handed to the analyzer: anything the scope chain of an
/// evaluation of `kind` resolves outside the binding itself.
pub(crate) fn known_names<'a>(
    env: &'a Environment,
    library: &'a Registry,
    context: &'a DataTree,
    kind: ScriptKind,
) -> impl Fn(&str) -> bool + 'a {
    move |name: &str| {
        env.is_known(name)
            || library.contains(name)
            || context.contains_key(name)
            || (kind == ScriptKind::Callback && (name == THIS_CONTEXT || name == ARGUMENTS))
    }
}

/// `THIS_CONTEXT` and `ARGUMENTS` for the callback template.
pub(crate) fn callback_locals(args: &[Value]) -> Vec<(&'static str, JsValue)> {
    vec![
        (THIS_CONTEXT, JsValue::object(Vec::new())),
        (
            ARGUMENTS,
            JsValue::array(args.iter().map(value::from_json).collect()),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triggers::NoopDispatcher;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn eval(binding: &str, context: &DataTree, args: Option<&[Value]>) -> EvaluationResult {
        let env = Environment::new();
        evaluate(
            &env,
            &EvalConfig::default(),
            binding,
            context,
            &Registry::with_builtins(),
            &NoopDispatcher,
            args,
        )
    }

    #[test]
    fn plain_expression() {
        let out = eval("1 + 2", &DataTree::new(), None);
        assert_eq!(out, EvaluationResult::new(Some(json!(3)), vec![]));
    }

    #[test]
    fn context_and_library_in_scope() {
        let mut context = DataTree::new();
        context.insert("Input1".into(), json!({ "text": "Hello" }));
        let out = eval("upper(Input1.text) + '!'", &context, None);
        assert_eq!(out.result, Some(json!("HELLO!")));
        assert!(out.errors.is_empty());
    }

    #[test]
    fn callback_arguments() {
        let args = [json!({ "value": "x" }), json!("1")];
        let out = eval("(a, b) => a.value + b", &DataTree::new(), Some(&args));
        assert_eq!(out.result, Some(json!("x1")));
        assert!(out.errors.is_empty());
    }

    #[test]
    fn this_context_is_an_empty_object() {
        let out = eval("function () { return this }", &DataTree::new(), Some(&[]));
        assert_eq!(out.result, Some(json!({})));
    }

    #[test]
    fn thrown_error_becomes_a_parse_diagnostic() {
        let out = eval("setTimeout(() => 1, 10)", &DataTree::new(), None);
        assert_eq!(out.result, None);
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].message(), "TypeError: setTimeout is not a function");
    }

    #[test]
    fn syntax_error_reports_lint_and_parse() {
        let out = eval("(1 +", &DataTree::new(), None);
        assert_eq!(out.result, None);
        assert_eq!(out.errors.len(), 2);
        assert!(!out.errors[0].is_runtime());
        assert!(out.errors[1].message().starts_with("SyntaxError: "));
    }

    #[test]
    fn circular_results_are_reported() {
        let out = eval("(() => { const o = {}; o.self = o; return o })()", &DataTree::new(), None);
        assert_eq!(out.result, None);
        assert_eq!(
            out.errors[0].message(),
            "TypeError: Converting circular structure to JSON"
        );
    }
}
