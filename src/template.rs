//! Script templates that wrap a binding before it is parsed.
//!
//! Positions reported by the lexer and parser refer to the wrapped text; the
//! helpers here map them back onto the binding as the user wrote it.

use crate::ast::Program;
use crate::escape::unescape_js;
use crate::lexer::Pos;
use crate::parser::{parse_program, ParseError};

const BINDING: &str = "<<binding>>";

const SYNC_TEMPLATE: &str = "
  function closedFunction () {
    const result = <<binding>>
    return result;
  }
  closedFunction()
  ";

const CALLBACK_TEMPLATE: &str = "
  function callback (script) {
    const userFunction = script;
    const result = userFunction?.apply(THIS_CONTEXT, ARGUMENTS);
    return result;
  }
  callback(<<binding>>)
  ";

const ASYNC_TEMPLATE: &str = "
  async function closedFunction () {
    const result = await <<binding>>;
    return result;
  }
  closedFunction()
  ";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptKind {
    /// The binding is an expression whose value is the result.
    Sync,
    /// The binding evaluates to a function applied to the callback arguments.
    Callback,
    /// The binding is awaited inside an async function.
    Async,
}

impl ScriptKind {
    fn template(self) -> &'static str {
        match self {
            ScriptKind::Sync => SYNC_TEMPLATE,
            ScriptKind::Callback => CALLBACK_TEMPLATE,
            ScriptKind::Async => ASYNC_TEMPLATE,
        }
    }

    /// Wrap `binding` in this kind's template.
    pub fn wrap(self, binding: &str) -> WrappedScript {
        let template = self.template();
        let (prefix, suffix) = template.split_once(BINDING).unwrap_or((template, ""));
        let line = prefix.matches('\n').count() as u32 + 1;
        let indent = prefix.rsplit('\n').next().unwrap_or(prefix);
        let col = indent.chars().count() as u32 + 1;
        let mut raw = String::with_capacity(template.len() + binding.len());
        raw.push_str(prefix);
        raw.push_str(binding);
        raw.push_str(suffix);
        WrappedScript {
            kind: self,
            raw,
            origin: Pos { line, col },
        }
    }
}

/// A binding embedded in its template.
#[derive(Clone, Debug, PartialEq)]
pub struct WrappedScript {
    pub kind: ScriptKind,
    pub raw: String,
    /// Where the first character of the binding sits in `raw`.
    pub origin: Pos,
}

impl WrappedScript {
    /// Map a position in the wrapped text onto the binding: template lines
    /// above it are subtracted, and so is the template indent on its first
    /// line.
    pub fn binding_pos(&self, pos: Pos) -> Pos {
        let line = (pos.line + 1).saturating_sub(self.origin.line).max(1);
        let col = if pos.line == self.origin.line {
            (pos.col + 1).saturating_sub(self.origin.col).max(1)
        } else {
            pos.col
        };
        Pos { line, col }
    }

    /// Text of line `line` (1-based) of the wrapped script.
    pub fn line_text(&self, line: u32) -> &str {
        self.raw
            .split('\n')
            .nth(line.saturating_sub(1) as usize)
            .unwrap_or("")
    }
}

/// A binding prepared for linting and execution.
#[derive(Debug)]
pub struct ParsedSource {
    pub script: WrappedScript,
    /// The binding exactly as it was received, before unescaping.
    pub original_binding: String,
    pub program: Result<Program, ParseError>,
}

impl ParsedSource {
    /// Unescape (when `unescape` is set), wrap and parse `binding`.
    pub fn new(kind: ScriptKind, binding: &str, unescape: bool) -> Self {
        let text = if unescape {
            unescape_js(binding)
        } else {
            binding.to_string()
        };
        let script = kind.wrap(&text);
        let program = parse_program(&script.raw);
        Self {
            script,
            original_binding: binding.to_string(),
            program,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn binding_origins() {
        assert_eq!(ScriptKind::Sync.wrap("x").origin, Pos { line: 3, col: 20 });
        assert_eq!(ScriptKind::Callback.wrap("x").origin, Pos { line: 7, col: 12 });
        assert_eq!(ScriptKind::Async.wrap("x").origin, Pos { line: 3, col: 26 });
    }

    #[test]
    fn sync_template_text() {
        let script = ScriptKind::Sync.wrap("1 + 1");
        assert_eq!(script.line_text(3), "    const result = 1 + 1");
        assert!(script.raw.ends_with("  closedFunction()\n  "));
    }

    #[test]
    fn positions_map_back_to_the_binding() {
        let script = ScriptKind::Sync.wrap("a +\n  wrongJS");
        assert_eq!(script.binding_pos(Pos { line: 3, col: 20 }), Pos { line: 1, col: 1 });
        assert_eq!(script.binding_pos(Pos { line: 3, col: 24 }), Pos { line: 1, col: 5 });
        assert_eq!(script.binding_pos(Pos { line: 4, col: 3 }), Pos { line: 2, col: 3 });
    }

    #[test]
    fn templates_parse() {
        for kind in [ScriptKind::Sync, ScriptKind::Callback, ScriptKind::Async] {
            let source = ParsedSource::new(kind, "() => 1", false);
            assert!(source.program.is_ok(), "{kind:?}: {:?}", source.program);
        }
    }

    #[test]
    fn unescaping_keeps_the_original_text() {
        let source = ParsedSource::new(ScriptKind::Sync, r#"\"hi\""#, true);
        assert_eq!(source.original_binding, r#"\"hi\""#);
        assert_eq!(source.script.line_text(3), r#"    const result = "hi""#);
    }
}
