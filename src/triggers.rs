//! Platform actions a binding may invoke. They run on the host, so from the
//! binding's point of view every one of them returns a promise.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;

use crate::errors::TriggerError;

#[derive(Debug, PartialEq, Eq)]
pub struct TriggerSpec {
    pub name: &'static str,
    pub action_type: &'static str,
    pub params: &'static [&'static str],
}

pub static TRIGGERS: &[TriggerSpec] = &[
    TriggerSpec {
        name: "showAlert",
        action_type: "SHOW_ALERT",
        params: &["message", "style"],
    },
    TriggerSpec {
        name: "navigateTo",
        action_type: "NAVIGATE_TO",
        params: &["pageNameOrUrl", "params", "target"],
    },
    TriggerSpec {
        name: "storeValue",
        action_type: "STORE_VALUE",
        params: &["key", "value", "persist"],
    },
    TriggerSpec {
        name: "removeValue",
        action_type: "REMOVE_VALUE",
        params: &["key"],
    },
    TriggerSpec {
        name: "clearStore",
        action_type: "CLEAR_STORE",
        params: &[],
    },
    TriggerSpec {
        name: "download",
        action_type: "DOWNLOAD",
        params: &["data", "name", "type"],
    },
    TriggerSpec {
        name: "copyToClipboard",
        action_type: "COPY_TO_CLIPBOARD",
        params: &["data", "options"],
    },
    TriggerSpec {
        name: "resetWidget",
        action_type: "RESET_WIDGET_META_RECURSIVE_BY_NAME",
        params: &["widgetName", "resetChildren"],
    },
    TriggerSpec {
        name: "showModal",
        action_type: "SHOW_MODAL_BY_NAME",
        params: &["modalName"],
    },
    TriggerSpec {
        name: "closeModal",
        action_type: "CLOSE_MODAL",
        params: &["modalName"],
    },
    TriggerSpec {
        name: "postWindowMessage",
        action_type: "POST_MESSAGE",
        params: &["message", "source", "targetOrigin"],
    },
];

pub fn find(name: &str) -> Option<&'static TriggerSpec> {
    TRIGGERS.iter().find(|t| t.name == name)
}

/// First trigger name appearing anywhere in `source`.
pub fn mentioned_in(source: &str) -> Option<&'static str> {
    TRIGGERS
        .iter()
        .map(|t| t.name)
        .find(|name| source.contains(name))
}

/// One trigger invocation, as handed to the host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerCall {
    pub action_type: String,
    pub payload: Value,
}

impl TriggerCall {
    /// Pair positional arguments with the trigger's parameter names.
    pub fn new(spec: &TriggerSpec, args: Vec<Value>) -> Self {
        let mut payload = serde_json::Map::new();
        for (name, value) in spec.params.iter().zip(args) {
            payload.insert((*name).to_string(), value);
        }
        Self {
            action_type: spec.action_type.to_string(),
            payload: Value::Object(payload),
        }
    }
}

/// Host side of trigger execution.
pub trait TriggerDispatcher {
    fn dispatch(&self, call: &TriggerCall) -> Result<Value, TriggerError>;
}

impl<T: TriggerDispatcher + ?Sized> TriggerDispatcher for Rc<T> {
    fn dispatch(&self, call: &TriggerCall) -> Result<Value, TriggerError> {
        (**self).dispatch(call)
    }
}

/// Resolves every trigger with `null`.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopDispatcher;

impl TriggerDispatcher for NoopDispatcher {
    fn dispatch(&self, _call: &TriggerCall) -> Result<Value, TriggerError> {
        Ok(Value::Null)
    }
}

/// Keeps every call and resolves it with `null`; useful for hosts that batch
/// actions and for tests.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    calls: RefCell<Vec<TriggerCall>>,
}

impl RecordingDispatcher {
    pub fn calls(&self) -> Vec<TriggerCall> {
        self.calls.borrow().clone()
    }
}

impl TriggerDispatcher for RecordingDispatcher {
    fn dispatch(&self, call: &TriggerCall) -> Result<Value, TriggerError> {
        self.calls.borrow_mut().push(call.clone());
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn payload_uses_parameter_names() {
        let spec = find("showAlert").unwrap();
        let call = TriggerCall::new(spec, vec![json!("hi"), json!("success")]);
        assert_eq!(call.action_type, "SHOW_ALERT");
        assert_eq!(call.payload, json!({"message": "hi", "style": "success"}));
    }

    #[test]
    fn source_scan_finds_names_anywhere() {
        assert_eq!(mentioned_in("() => x ? showModal('m') : 1"), Some("showModal"));
        assert_eq!(mentioned_in("() => 1"), None);
    }
}
