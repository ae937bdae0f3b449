//! Async evaluation of trigger bindings and the worker's response messages.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::context::{DataTree, EvalConfig, ExecutionMode};
use crate::diagnostics::{Diagnostic, EvaluationResult};
use crate::environment::Environment;
use crate::errors::{Result, SandboxError};
use crate::executor::known_names;
use crate::functions::Registry;
use crate::interpreter::{export, Interpreter};
use crate::lint;
use crate::template::{ParsedSource, ScriptKind};
use crate::triggers::TriggerDispatcher;
use crate::value::{describe_thrown, PromiseState, Thrown};

/// Messages the worker sends back to its host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    #[serde(rename_all = "camelCase")]
    EvalResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        result: EvaluationResult,
    },
    #[serde(rename_all = "camelCase")]
    IsAsyncResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        is_async: bool,
    },
    #[serde(rename_all = "camelCase")]
    ProcessTrigger {
        request_id: String,
        response_data: ResponseData,
    },
    /// A request that could not be served: undecodable, or breaking the
    /// message contract.
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        message: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    pub finished: bool,
    pub result: EvaluationResult,
}

pub type ResponseSender = UnboundedSender<WorkerMessage>;

/// Evaluate a trigger binding and answer with one `PROCESS_TRIGGER` envelope
/// once its promise settles.
///
/// A binding whose promise can never settle gets no envelope.
#[allow(clippy::too_many_arguments)]
pub async fn evaluate_async(
    env: &Environment,
    config: &EvalConfig,
    binding: &str,
    context: &DataTree,
    library: &Registry,
    dispatcher: &dyn TriggerDispatcher,
    request_id: &str,
    tx: &ResponseSender,
) -> Result<()> {
    debug!(request_id, len = binding.len(), "evaluate_async");
    let source = ParsedSource::new(ScriptKind::Async, binding, config.unescapes_strings());
    let mut errors = lint::lint(
        &source,
        &known_names(env, library, context, ScriptKind::Async),
    );

    let settled = match &source.program {
        Err(err) => Err(format!("SyntaxError: {}", err.message)),
        Ok(program) => {
            let mut interp = Interpreter::new(
                env,
                library,
                dispatcher,
                config,
                ExecutionMode::Async {
                    request_id: request_id.to_string(),
                },
                context,
                Vec::new(),
            );
            match interp.run_program(program) {
                Err(Thrown(err)) => Err(describe_thrown(&err)),
                Ok(value) => {
                    let promise = interp.to_promise(value);
                    loop {
                        let state = promise.borrow().state.clone();
                        match state {
                            PromiseState::Fulfilled(v) => {
                                break export(&v).map_err(|Thrown(e)| describe_thrown(&e))
                            }
                            PromiseState::Rejected(reason) => break Err(describe_thrown(&reason)),
                            PromiseState::Pending if !interp.has_pending_microtasks() => {
                                warn!(request_id, "binding promise never settles; no response sent");
                                return Ok(());
                            }
                            PromiseState::Pending => {
                                interp.run_microtasks();
                                tokio::task::yield_now().await;
                            }
                        }
                    }
                }
            }
        }
    };

    let result = match settled {
        Ok(value) => EvaluationResult::new(value, errors),
        Err(message) => {
            debug!(request_id, %message, "binding rejected");
            errors.push(Diagnostic::runtime(&source, message));
            EvaluationResult::new(None, errors)
        }
    };
    let message = WorkerMessage::ProcessTrigger {
        request_id: request_id.to_string(),
        response_data: ResponseData {
            finished: true,
            result,
        },
    };
    tx.send(message).map_err(|_| {
        warn!(request_id, "response channel closed");
        SandboxError::ChannelClosed {
            request_id: request_id.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn envelope_wire_shape() {
        let message = WorkerMessage::ProcessTrigger {
            request_id: "r1".into(),
            response_data: ResponseData {
                finished: true,
                result: EvaluationResult::new(Some(json!(1)), vec![]),
            },
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "type": "PROCESS_TRIGGER",
                "requestId": "r1",
                "responseData": { "finished": true, "result": { "result": 1, "errors": [] } }
            })
        );
    }

    #[test]
    fn classification_reply_shape() {
        let message = WorkerMessage::IsAsyncResult {
            request_id: None,
            is_async: true,
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({ "type": "IS_ASYNC_RESULT", "isAsync": true })
        );
    }

    #[test]
    fn error_reply_shape() {
        let message = WorkerMessage::Error {
            request_id: Some("r2".into()),
            message: "TypeError: binding must be a string, got number".into(),
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "type": "ERROR",
                "requestId": "r2",
                "message": "TypeError: binding must be a string, got number"
            })
        );
    }
}
