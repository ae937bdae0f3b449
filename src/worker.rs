use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::classifier;
use crate::context::{DataTree, EvalConfig};
use crate::coordinator::{self, ResponseSender, WorkerMessage};
use crate::diagnostics::EvaluationResult;
use crate::environment::Environment;
use crate::errors::{Result, SandboxError};
use crate::executor;
use crate::functions::Registry;
use crate::triggers::{NoopDispatcher, TriggerDispatcher};

/// Requests a host sends to a worker. Bindings arrive as untyped JSON and are
/// checked for being strings here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerRequest {
    #[serde(rename_all = "camelCase")]
    Eval {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        binding: Value,
        #[serde(default)]
        context: DataTree,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        callback_args: Option<Vec<Value>>,
    },
    #[serde(rename_all = "camelCase")]
    EvalAsync {
        request_id: String,
        binding: Value,
        #[serde(default)]
        context: DataTree,
    },
    #[serde(rename_all = "camelCase")]
    IsAsync {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        binding: Value,
        #[serde(default)]
        context: DataTree,
    },
    SetEvaluationVersion {
        version: u32,
    },
}

/// One evaluation worker: its configuration, restricted environment,
/// additional library and trigger host.
///
/// Interpreter values are reference counted, so a worker stays on the task
/// that drives it.
pub struct Worker {
    config: EvalConfig,
    env: Environment,
    library: Registry,
    dispatcher: Box<dyn TriggerDispatcher>,
}

impl Worker {
    pub fn new(config: EvalConfig, library: Registry) -> Self {
        info!(
            version = config.evaluation_version,
            classifier = ?config.classifier,
            helpers = library.entries().len(),
            "worker created"
        );
        Self {
            config,
            env: Environment::new(),
            library,
            dispatcher: Box::new(NoopDispatcher),
        }
    }

    /// Route trigger calls made on the async path to `dispatcher`.
    pub fn with_dispatcher(mut self, dispatcher: impl TriggerDispatcher + 'static) -> Self {
        self.dispatcher = Box::new(dispatcher);
        self
    }

    /// Reinstall the restricted environment.
    pub fn setup(&mut self) {
        self.env.setup();
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    pub fn set_evaluation_version(&mut self, version: u32) {
        info!(from = self.config.evaluation_version, to = version, "evaluation version changed");
        self.config.evaluation_version = version;
    }

    pub fn evaluate(
        &self,
        binding: &str,
        context: &DataTree,
        callback_args: Option<&[Value]>,
    ) -> EvaluationResult {
        executor::evaluate(
            &self.env,
            &self.config,
            binding,
            context,
            &self.library,
            self.dispatcher.as_ref(),
            callback_args,
        )
    }

    pub async fn evaluate_async(
        &self,
        binding: &str,
        context: &DataTree,
        request_id: &str,
        tx: &ResponseSender,
    ) -> Result<()> {
        coordinator::evaluate_async(
            &self.env,
            &self.config,
            binding,
            context,
            &self.library,
            self.dispatcher.as_ref(),
            request_id,
            tx,
        )
        .await
    }

    pub fn is_async(&self, binding: &str, context: &DataTree) -> bool {
        classifier::is_async(&self.env, &self.config, binding, context, &self.library)
    }

    /// Serve one request, replying on `tx`.
    pub async fn handle(&mut self, request: WorkerRequest, tx: &ResponseSender) -> Result<()> {
        match request {
            WorkerRequest::Eval {
                request_id,
                binding,
                context,
                callback_args,
            } => {
                let result = self.evaluate(binding_text(&binding)?, &context, callback_args.as_deref());
                reply(tx, WorkerMessage::EvalResult { request_id, result })
            }
            WorkerRequest::EvalAsync {
                request_id,
                binding,
                context,
            } => {
                self.evaluate_async(binding_text(&binding)?, &context, &request_id, tx)
                    .await
            }
            WorkerRequest::IsAsync {
                request_id,
                binding,
                context,
            } => {
                let is_async = self.is_async(binding_text(&binding)?, &context);
                reply(tx, WorkerMessage::IsAsyncResult { request_id, is_async })
            }
            WorkerRequest::SetEvaluationVersion { version } => {
                self.set_evaluation_version(version);
                Ok(())
            }
        }
    }

    /// Serve one JSON-encoded request. A line that does not decode, or a
    /// request that breaks the message contract, is answered with an `ERROR`
    /// message carrying the request's `requestId` when it has one.
    pub async fn handle_line(&mut self, line: &str, tx: &ResponseSender) -> Result<()> {
        let raw: Value = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => return refuse(tx, None, &SandboxError::from(e)),
        };
        let request_id = raw
            .get("requestId")
            .and_then(Value::as_str)
            .map(str::to_string);
        let outcome = match serde_json::from_value::<WorkerRequest>(raw) {
            Ok(request) => self.handle(request, tx).await,
            Err(e) => Err(e.into()),
        };
        match outcome {
            Err(err @ SandboxError::ChannelClosed { .. }) => Err(err),
            Err(err) => refuse(tx, request_id, &err),
            Ok(()) => Ok(()),
        }
    }
}

fn refuse(tx: &ResponseSender, request_id: Option<String>, err: &SandboxError) -> Result<()> {
    warn!(?request_id, error = %err, "request refused");
    reply(
        tx,
        WorkerMessage::Error {
            request_id,
            message: err.to_string(),
        },
    )
}

fn binding_text(binding: &Value) -> Result<&str> {
    match binding {
        Value::String(s) => Ok(s),
        other => Err(SandboxError::BindingNotString {
            found: json_type(other),
        }),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn reply(tx: &ResponseSender, message: WorkerMessage) -> Result<()> {
    let request_id = match &message {
        WorkerMessage::EvalResult { request_id, .. }
        | WorkerMessage::IsAsyncResult { request_id, .. }
        | WorkerMessage::Error { request_id, .. } => request_id.clone(),
        WorkerMessage::ProcessTrigger { request_id, .. } => Some(request_id.clone()),
    };
    debug!(?request_id, "reply");
    tx.send(message).map_err(|_| SandboxError::ChannelClosed {
        request_id: request_id.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn requests_decode_from_json() {
        let request: WorkerRequest = serde_json::from_value(json!({
            "type": "EVAL",
            "binding": "1 + 1",
            "callbackArgs": [1]
        }))
        .unwrap();
        assert_eq!(
            request,
            WorkerRequest::Eval {
                request_id: None,
                binding: json!("1 + 1"),
                context: DataTree::new(),
                callback_args: Some(vec![json!(1)]),
            }
        );
        let request: WorkerRequest =
            serde_json::from_value(json!({ "type": "SET_EVALUATION_VERSION", "version": 2 }))
                .unwrap();
        assert_eq!(request, WorkerRequest::SetEvaluationVersion { version: 2 });
    }

    #[test]
    fn non_string_binding_is_a_contract_violation() {
        let err = binding_text(&json!(42)).unwrap_err();
        assert!(matches!(err, SandboxError::BindingNotString { found: "number" }));
        assert_eq!(err.to_string(), "TypeError: binding must be a string, got number");
    }

    #[test]
    fn version_changes_stick() {
        let mut worker = Worker::new(EvalConfig::default(), Registry::new());
        worker.set_evaluation_version(2);
        assert_eq!(worker.config().evaluation_version, 2);
        assert!(!worker.config().unescapes_strings());
    }
}
