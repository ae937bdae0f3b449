pub mod errors;
pub mod context;
pub mod functions;  // additional library helpers
pub mod lexer;
pub mod ast;
pub mod parser;
pub mod value;
pub mod interpreter;
pub mod environment;
pub mod triggers;
pub mod escape;
pub mod template;
pub mod diagnostics;
pub mod lint;
pub mod executor;
pub mod classifier;
pub mod coordinator;
pub mod worker;
mod comparison;
mod stack;

use serde_json::Value;

pub use context::{ClassifierMode, DataTree, EvalConfig};
pub use coordinator::{ResponseData, ResponseSender, WorkerMessage};
pub use diagnostics::{Diagnostic, EvaluationResult, Severity};
pub use errors::{Result, SandboxError};
pub use functions::{Function, Registry};
pub use triggers::{NoopDispatcher, RecordingDispatcher, TriggerCall, TriggerDispatcher};
pub use worker::{Worker, WorkerRequest};

/// Convenience: evaluate one binding against `context` with the default
/// configuration and the built-in library.
pub fn evaluate(binding: &str, context: &DataTree) -> EvaluationResult {
    Worker::new(EvalConfig::default(), Registry::with_builtins()).evaluate(binding, context, None)
}

/// Convenience: the value of `binding`, or `null` when it has none or fails.
pub fn evaluate_or_null(binding: &str, context: &DataTree) -> Value {
    evaluate(binding, context).result.unwrap_or(Value::Null)
}
