// src/lexer.rs
use std::fmt;

/// 1-based source position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

impl Default for Pos {
    fn default() -> Self {
        Self { line: 1, col: 1 }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TemplateChunk {
    Text(String),
    /// Source of a `${...}` hole and where it starts.
    Expr { source: String, pos: Pos },
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Number(f64),
    Str(String),
    Template(Vec<TemplateChunk>),
    Punct(&'static str),
    Eof,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: Pos,
    /// A line break separates this token from the previous one.
    pub newline_before: bool,
}

impl Token {
    pub fn is_punct(&self, p: &str) -> bool {
        matches!(&self.kind, TokenKind::Punct(q) if *q == p)
    }

    pub fn is_ident(&self, name: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(n) if n == name)
    }

    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Ident(n) => n.clone(),
            TokenKind::Number(n) => n.to_string(),
            TokenKind::Str(s) => format!("'{s}'"),
            TokenKind::Template(_) => "template literal".into(),
            TokenKind::Punct(p) => (*p).to_string(),
            TokenKind::Eof => "end of input".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub pos: Pos,
}

// Longest first so that `===` wins over `==` and `=`.
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "...", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=",
    "-=", "*=", "/=", "+", "-", "*", "/", "%", "<", ">", "!", "=", "?", ":", ".", ",", ";", "(",
    ")", "[", "]", "{", "}",
];

pub struct Lexer<'a> {
    s: &'a str,
    i: usize,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(s: &'a str) -> Self {
        Self::with_origin(s, Pos::default())
    }

    /// Lex a fragment whose first character sits at `origin` in the enclosing text.
    pub fn with_origin(s: &'a str, origin: Pos) -> Self {
        Self {
            s,
            i: 0,
            line: origin.line,
            col: origin.col,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut out = Vec::new();
        loop {
            let newline_before = self.skip_trivia()?;
            let pos = self.pos();
            let Some(c) = self.peek_char() else {
                out.push(Token {
                    kind: TokenKind::Eof,
                    pos,
                    newline_before,
                });
                return Ok(out);
            };
            let kind = if c == '"' || c == '\'' {
                TokenKind::Str(self.parse_quoted_string()?)
            } else if c == '`' {
                TokenKind::Template(self.parse_template()?)
            } else if c.is_ascii_digit()
                || (c == '.' && self.peek_nth(1).is_some_and(|d| d.is_ascii_digit()))
            {
                TokenKind::Number(self.parse_number_literal()?)
            } else if is_ident_start(c) {
                TokenKind::Ident(self.parse_identifier())
            } else if let Some(p) = PUNCTUATORS.iter().find(|p| self.peek_str(p)) {
                for _ in 0..p.len() {
                    self.bump();
                }
                TokenKind::Punct(*p)
            } else {
                return Err(self.error(format!("Unexpected character '{c}'")));
            };
            out.push(Token {
                kind,
                pos,
                newline_before,
            });
        }
    }

    fn pos(&self) -> Pos {
        Pos {
            line: self.line,
            col: self.col,
        }
    }

    fn error(&self, message: impl Into<String>) -> LexError {
        LexError {
            message: message.into(),
            pos: self.pos(),
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.i += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    /// Skip whitespace and comments; reports whether a line break was crossed.
    fn skip_trivia(&mut self) -> Result<bool, LexError> {
        let mut newline = false;
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    newline |= c == '\n';
                    self.bump();
                }
                Some('/') if self.peek_str("//") => {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_str("/*") => {
                    let start = self.pos();
                    self.bump();
                    self.bump();
                    loop {
                        if self.peek_str("*/") {
                            self.bump();
                            self.bump();
                            break;
                        }
                        match self.bump() {
                            Some('\n') => newline = true,
                            Some(_) => {}
                            None => {
                                return Err(LexError {
                                    message: "Unterminated comment".into(),
                                    pos: start,
                                })
                            }
                        }
                    }
                }
                _ => return Ok(newline),
            }
        }
    }

    pub fn parse_identifier(&mut self) -> String {
        let start = self.i;
        while let Some(c) = self.peek_char() {
            if is_ident_part(c) {
                self.bump();
            } else {
                break;
            }
        }
        self.s[start..self.i].to_string()
    }

    pub fn parse_number_literal(&mut self) -> Result<f64, LexError> {
        let start = self.i;
        if self.peek_str("0x") || self.peek_str("0X") {
            self.bump();
            self.bump();
            let digits_start = self.i;
            while self.peek_char().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.bump();
            }
            return u64::from_str_radix(&self.s[digits_start..self.i], 16)
                .map(|n| n as f64)
                .map_err(|_| self.error("Invalid hexadecimal literal"));
        }
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek_char() == Some('.') {
            self.bump();
            while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek_char(), Some('e' | 'E')) {
            self.bump();
            if matches!(self.peek_char(), Some('+' | '-')) {
                self.bump();
            }
            while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if self.peek_char().is_some_and(is_ident_start) {
            return Err(self.error("Invalid or unexpected token"));
        }
        self.s[start..self.i]
            .parse::<f64>()
            .map_err(|_| self.error("Invalid number literal"))
    }

    pub fn parse_quoted_string(&mut self) -> Result<String, LexError> {
        let start = self.pos();
        let quote = self.bump().ok_or_else(|| self.error("string expected"))?;
        let mut out = String::new();
        while let Some(c) = self.bump() {
            if c == quote {
                return Ok(out);
            }
            match c {
                '\\' => self.parse_escape(&mut out)?,
                '\n' => break,
                _ => out.push(c),
            }
        }
        Err(LexError {
            message: "Invalid or unexpected token".into(),
            pos: start,
        })
    }

    fn parse_escape(&mut self, out: &mut String) -> Result<(), LexError> {
        let Some(nc) = self.bump() else {
            return Err(self.error("Invalid or unexpected token"));
        };
        match nc {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '0' => out.push('\0'),
            '\n' => {}
            'x' => {
                let code = self.take_hex(2)?;
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            'u' => {
                let code = if self.peek_char() == Some('{') {
                    self.bump();
                    let start = self.i;
                    while self.peek_char().is_some_and(|c| c != '}') {
                        self.bump();
                    }
                    let code = u32::from_str_radix(&self.s[start..self.i], 16)
                        .map_err(|_| self.error("Invalid Unicode escape sequence"))?;
                    self.bump();
                    code
                } else {
                    self.take_hex(4)?
                };
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            other => out.push(other),
        }
        Ok(())
    }

    fn take_hex(&mut self, n: usize) -> Result<u32, LexError> {
        let start = self.i;
        for _ in 0..n {
            if !self.peek_char().is_some_and(|c| c.is_ascii_hexdigit()) {
                return Err(self.error("Invalid hexadecimal escape sequence"));
            }
            self.bump();
        }
        u32::from_str_radix(&self.s[start..self.i], 16)
            .map_err(|_| self.error("Invalid hexadecimal escape sequence"))
    }

    fn parse_template(&mut self) -> Result<Vec<TemplateChunk>, LexError> {
        let start = self.pos();
        self.bump();
        let mut chunks = Vec::new();
        let mut text = String::new();
        while let Some(c) = self.bump() {
            match c {
                '`' => {
                    chunks.push(TemplateChunk::Text(text));
                    return Ok(chunks);
                }
                '\\' => self.parse_escape(&mut text)?,
                '$' if self.peek_char() == Some('{') => {
                    self.bump();
                    chunks.push(TemplateChunk::Text(std::mem::take(&mut text)));
                    let pos = self.pos();
                    let source = self.capture_hole()?;
                    chunks.push(TemplateChunk::Expr { source, pos });
                }
                _ => text.push(c),
            }
        }
        Err(LexError {
            message: "Unterminated template literal".into(),
            pos: start,
        })
    }

    /// Capture the source of a `${...}` hole up to its matching brace.
    fn capture_hole(&mut self) -> Result<String, LexError> {
        let start = self.i;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        loop {
            let Some(c) = self.peek_char() else {
                return Err(self.error("Unterminated template literal"));
            };
            if let Some(q) = quote {
                if c == '\\' {
                    self.bump();
                } else if c == q {
                    quote = None;
                }
                self.bump();
                continue;
            }
            match c {
                '"' | '\'' | '`' => quote = Some(c),
                '{' => depth += 1,
                '}' if depth == 0 => {
                    let source = self.s[start..self.i].to_string();
                    self.bump();
                    return Ok(source);
                }
                '}' => depth -= 1,
                _ => {}
            }
            self.bump();
        }
    }

    pub fn peek_char(&self) -> Option<char> {
        self.s[self.i..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.s[self.i..].chars().nth(n)
    }

    pub fn peek_str(&self, lit: &str) -> bool {
        self.s[self.i..].starts_with(lit)
    }
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphabetic()
}

fn is_ident_part(c: char) -> bool {
    is_ident_start(c) || c.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn tracks_positions_and_line_breaks() {
        let toks = Lexer::new("a\n  b").tokenize().unwrap();
        assert_eq!(toks[1].pos, Pos { line: 2, col: 3 });
        assert!(toks[1].newline_before);
        assert!(!toks[0].newline_before);
    }

    #[test]
    fn longest_punctuator_wins() {
        assert_eq!(
            kinds("a?.b ?? c === d"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Punct("?."),
                TokenKind::Ident("b".into()),
                TokenKind::Punct("??"),
                TokenKind::Ident("c".into()),
                TokenKind::Punct("==="),
                TokenKind::Ident("d".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strings_numbers_and_comments() {
        assert_eq!(
            kinds("'a\\'b' /* x */ 1.5e2 // tail"),
            vec![
                TokenKind::Str("a'b".into()),
                TokenKind::Number(150.0),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn template_holes_keep_their_source() {
        let toks = kinds("`hi ${user.name}!`");
        let TokenKind::Template(chunks) = &toks[0] else {
            panic!("expected template");
        };
        assert_eq!(chunks[0], TemplateChunk::Text("hi ".into()));
        assert!(
            matches!(&chunks[1], TemplateChunk::Expr { source, pos } if source == "user.name" && pos.col == 6)
        );
        assert_eq!(chunks[2], TemplateChunk::Text("!".into()));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = Lexer::new("'abc").tokenize().unwrap_err();
        assert_eq!(err.pos, Pos { line: 1, col: 1 });
    }
}
