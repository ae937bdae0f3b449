use tracing::debug;

use crate::interpreter::builtins;
use crate::interpreter::scope::{Scope, ScopeRef};
use crate::triggers::TRIGGERS;
use crate::value::{Callable, JsValue};

/// Host capabilities that must never be reachable from a binding. They stay
/// known names (bound to `undefined`) so calling one reports
/// `TypeError: <name> is not a function`.
pub const BLOCKED_GLOBALS: &[&str] = &[
    "setTimeout",
    "setInterval",
    "clearTimeout",
    "clearInterval",
    "setImmediate",
    "clearImmediate",
    "requestAnimationFrame",
    "queueMicrotask",
    "fetch",
    "XMLHttpRequest",
    "WebSocket",
    "importScripts",
    "localStorage",
    "sessionStorage",
    "indexedDB",
    "navigator",
    "location",
    "process",
    "require",
    "eval",
    "Function",
    "globalThis",
    "self",
    "window",
    "document",
];

/// The restricted global scope shared by every evaluation of a worker.
pub struct Environment {
    scope: ScopeRef,
    names: Vec<&'static str>,
    installed: bool,
}

impl Environment {
    pub fn new() -> Self {
        let mut env = Self {
            scope: Scope::root(),
            names: Vec::new(),
            installed: false,
        };
        env.setup();
        env
    }

    /// (Re)install the allow-list, the trigger capabilities and the blocked
    /// names. Safe to call repeatedly.
    pub fn setup(&mut self) {
        let scope = Scope::root();
        let mut names = Vec::new();
        for (name, value) in builtins::globals() {
            scope.declare(name, value, false);
            names.push(name);
        }
        for spec in TRIGGERS {
            scope.declare(spec.name, JsValue::function(Callable::Trigger(spec)), false);
            names.push(spec.name);
        }
        for name in BLOCKED_GLOBALS {
            scope.declare(name, JsValue::Undefined, false);
            names.push(*name);
        }
        debug!(globals = names.len(), reinstall = self.installed, "environment installed");
        self.scope = scope;
        self.names = names;
        self.installed = true;
    }

    pub fn scope(&self) -> ScopeRef {
        self.scope.clone()
    }

    /// Whether `name` resolves in the global scope, blocked names included.
    pub fn is_known(&self, name: &str) -> bool {
        self.names.iter().any(|n| *n == name)
    }

    pub fn names(&self) -> &[&'static str] {
        &self.names
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_names_are_known_but_undefined() {
        let env = Environment::new();
        assert!(env.is_known("setTimeout"));
        assert!(matches!(env.scope().lookup("fetch"), Some(JsValue::Undefined)));
        assert!(!env.is_known("wrongJS"));
    }

    #[test]
    fn setup_is_idempotent() {
        let mut env = Environment::new();
        let before = env.names().len();
        env.setup();
        env.setup();
        assert_eq!(env.names().len(), before);
        assert!(env.is_known("showAlert"));
        assert!(env.scope().lookup("Math").is_some());
    }
}
