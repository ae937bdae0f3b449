use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::lexer::Pos;
use crate::template::ParsedSource;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A static finding about the binding, positioned relative to the binding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LintDiagnostic {
    pub code: String,
    pub line: u32,
    pub ch: u32,
    pub severity: Severity,
    pub error_message: String,
    /// The offending line of the wrapped script.
    pub error_segment: String,
    pub raw: String,
    pub original_binding: String,
    pub variables: [Option<String>; 4],
}

/// A failure while running the binding: a thrown error, a syntax error or an
/// unserializable result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeDiagnostic {
    pub error_message: String,
    pub severity: Severity,
    pub raw: String,
    pub original_binding: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "errorType")]
pub enum Diagnostic {
    #[serde(rename = "LINT")]
    Lint(LintDiagnostic),
    #[serde(rename = "PARSE")]
    Parse(RuntimeDiagnostic),
}

impl Diagnostic {
    /// A lint finding at `pos` (a position in the wrapped script).
    pub fn lint(
        source: &ParsedSource,
        code: &str,
        severity: Severity,
        message: String,
        pos: Pos,
        variable: Option<&str>,
    ) -> Self {
        let at = source.script.binding_pos(pos);
        Diagnostic::Lint(LintDiagnostic {
            code: code.to_string(),
            line: at.line,
            ch: at.col,
            severity,
            error_message: message,
            error_segment: source.script.line_text(pos.line).to_string(),
            raw: source.script.raw.clone(),
            original_binding: source.original_binding.clone(),
            variables: [variable.map(str::to_string), None, None, None],
        })
    }

    /// A runtime failure; `message` is `<ErrorName>: <message>`.
    pub fn runtime(source: &ParsedSource, message: String) -> Self {
        Diagnostic::Parse(RuntimeDiagnostic {
            error_message: message,
            severity: Severity::Error,
            raw: source.script.raw.clone(),
            original_binding: source.original_binding.clone(),
        })
    }

    pub fn severity(&self) -> Severity {
        match self {
            Diagnostic::Lint(d) => d.severity,
            Diagnostic::Parse(d) => d.severity,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Diagnostic::Lint(d) => &d.error_message,
            Diagnostic::Parse(d) => &d.error_message,
        }
    }

    pub fn original_binding(&self) -> &str {
        match self {
            Diagnostic::Lint(d) => &d.original_binding,
            Diagnostic::Parse(d) => &d.original_binding,
        }
    }

    pub fn is_runtime(&self) -> bool {
        matches!(self, Diagnostic::Parse(_))
    }
}

/// Outcome of one evaluation.
///
/// A result never coexists with an error-severity diagnostic: runtime
/// failures and static errors both leave `result` absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub errors: Vec<Diagnostic>,
}

impl EvaluationResult {
    pub fn new(result: Option<Value>, errors: Vec<Diagnostic>) -> Self {
        let result = if errors.iter().any(|e| e.severity() == Severity::Error) {
            None
        } else {
            result
        };
        Self { result, errors }
    }

    pub fn has_runtime_error(&self) -> bool {
        self.errors.iter().any(Diagnostic::is_runtime)
    }

    /// Lint findings only.
    pub fn lint_errors(&self) -> impl Iterator<Item = &LintDiagnostic> {
        self.errors.iter().filter_map(|e| match e {
            Diagnostic::Lint(d) => Some(d),
            Diagnostic::Parse(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::ScriptKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn source() -> ParsedSource {
        ParsedSource::new(ScriptKind::Sync, "wrongJS", false)
    }

    #[test]
    fn runtime_error_drops_the_result() {
        let src = source();
        let out = EvaluationResult::new(
            Some(json!(1)),
            vec![Diagnostic::runtime(&src, "TypeError: boom".into())],
        );
        assert_eq!(out.result, None);
        assert!(out.has_runtime_error());
    }

    #[test]
    fn lint_warning_keeps_the_result() {
        let src = source();
        let lint = Diagnostic::lint(
            &src,
            "W004",
            Severity::Warning,
            "'a' is already defined.".into(),
            Pos { line: 3, col: 20 },
            Some("a"),
        );
        let out = EvaluationResult::new(Some(json!(2)), vec![lint]);
        assert_eq!(out.result, Some(json!(2)));
        assert_eq!(out.lint_errors().count(), 1);
    }

    #[test]
    fn wire_shape() {
        let src = source();
        let lint = Diagnostic::lint(
            &src,
            "W117",
            Severity::Error,
            "'wrongJS' is not defined.".into(),
            Pos { line: 3, col: 20 },
            Some("wrongJS"),
        );
        let out = EvaluationResult::new(None, vec![lint]);
        let value = serde_json::to_value(&out).unwrap();
        assert!(value.get("result").is_none());
        let err = &value["errors"][0];
        assert_eq!(err["errorType"], json!("LINT"));
        assert_eq!(err["code"], json!("W117"));
        assert_eq!(err["line"], json!(1));
        assert_eq!(err["ch"], json!(1));
        assert_eq!(err["severity"], json!("error"));
        assert_eq!(err["errorSegment"], json!("    const result = wrongJS"));
        assert_eq!(err["originalBinding"], json!("wrongJS"));
        assert_eq!(err["variables"], json!(["wrongJS", null, null, null]));

        let back: EvaluationResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, out);
    }
}
