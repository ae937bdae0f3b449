use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::{Result, SandboxError};

/// Entity name -> entity state, as produced by the host data-tree builder.
pub type DataTree = serde_json::Map<String, serde_json::Value>;

/// Evaluation version whose string handling unescapes binding text first.
pub const LEGACY_EVALUATION_VERSION: u32 = 1;

/// How the classifier decides between the sync and async paths.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClassifierMode {
    /// Text and syntax inspection only; the binding is never run.
    #[default]
    Static,
    /// Static inspection, then a live invocation when that finds nothing.
    Trial,
}

/// Per-worker evaluation knobs. Owned by the worker and handed to every
/// component explicitly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EvalConfig {
    pub evaluation_version: u32,
    pub classifier: ClassifierMode,
    pub max_call_depth: usize,
    pub max_loop_iterations: u64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            evaluation_version: LEGACY_EVALUATION_VERSION,
            classifier: ClassifierMode::Static,
            max_call_depth: 128,
            max_loop_iterations: 1_000_000,
        }
    }
}

impl EvalConfig {
    /// Load a JSON config file; missing keys fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SandboxError::Config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&raw).map_err(|e| SandboxError::Config(e.to_string()))
    }

    /// Whether binding text is unescaped once before evaluation.
    pub fn unescapes_strings(&self) -> bool {
        self.evaluation_version <= LEGACY_EVALUATION_VERSION
    }
}

/// Per-call state: whether asynchronous work is permitted and for whom.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Data field evaluation; trigger capabilities are refused.
    Sync,
    /// Trigger evaluation for `request_id`; capabilities are dispatched.
    Async { request_id: String },
    /// Classification run; capabilities only mark the run as asynchronous.
    Trial,
}

impl ExecutionMode {
    pub fn allows_async(&self) -> bool {
        matches!(self, Self::Async { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_config_uses_defaults() {
        let cfg: EvalConfig =
            serde_json::from_str(r#"{"evaluationVersion": 2, "classifier": "trial"}"#).unwrap();
        assert_eq!(cfg.evaluation_version, 2);
        assert_eq!(cfg.classifier, ClassifierMode::Trial);
        assert_eq!(cfg.max_call_depth, 128);
        assert!(!cfg.unescapes_strings());
        assert!(EvalConfig::default().unescapes_strings());
    }
}
