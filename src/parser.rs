// src/parser.rs
use std::fmt;
use std::rc::Rc;

use crate::ast::{
    AssignOp, BinaryOp, DeclKind, Declarator, Expr, FunctionBody, FunctionDef, LogicalOp,
    MemberProp, ObjectEntry, Param, Program, PropKey, Stmt, TemplatePart, UnaryOp,
};
use crate::lexer::{LexError, Lexer, Pos, TemplateChunk, Token, TokenKind};
use crate::stack::ensure_sufficient_stack;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub pos: Pos,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError {
            message: e.message,
            pos: e.pos,
        }
    }
}

type PResult<T> = Result<T, ParseError>;

/// Deepest nesting of statements and expressions a binding may use.
pub const MAX_NESTING: usize = 256;

/// Words that can never name a variable.
pub const RESERVED_WORDS: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "default", "delete", "do", "else",
    "false", "finally", "for", "function", "if", "in", "instanceof", "let", "new", "null",
    "return", "switch", "this", "throw", "true", "try", "typeof", "var", "void", "while",
];

pub fn parse_program(src: &str) -> PResult<Program> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut p = Parser::new(tokens, false);
    let mut body = Vec::new();
    while !p.at_eof() {
        body.push(p.parse_statement()?);
    }
    Ok(Program { body })
}

/// Parse a standalone expression; trailing input is an error.
pub fn parse_expression(src: &str) -> PResult<Expr> {
    expression(src, false)
}

/// Like [`parse_expression`], but the expression sits in an async body so a
/// leading `await` is accepted.
pub fn parse_async_expression(src: &str) -> PResult<Expr> {
    expression(src, true)
}

fn expression(src: &str, in_async: bool) -> PResult<Expr> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut p = Parser::new(tokens, in_async);
    let expr = p.parse_assignment()?;
    p.consume_punct(";");
    if !p.at_eof() {
        return Err(p.unexpected());
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    i: usize,
    /// One entry per enclosing function: whether it is `async`.
    functions: Vec<bool>,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, in_async: bool) -> Self {
        Self {
            tokens,
            i: 0,
            functions: vec![in_async],
            depth: 0,
        }
    }

    /// Count one more level of nesting, failing past [`MAX_NESTING`].
    fn enter(&mut self) -> PResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ParseError {
                message: format!("Maximum nesting depth of {MAX_NESTING} exceeded"),
                pos: self.peek().pos,
            });
        }
        Ok(())
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        self.enter()?;
        let out = ensure_sufficient_stack(|| f(self));
        self.depth -= 1;
        out
    }

    // ---- token helpers -------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.i.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        &self.tokens[(self.i + offset).min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.i < self.tokens.len() - 1 {
            self.i += 1;
        }
        tok
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn check_punct(&self, p: &str) -> bool {
        self.peek().is_punct(p)
    }

    fn check_ident(&self, name: &str) -> bool {
        self.peek().is_ident(name)
    }

    fn consume_punct(&mut self, p: &str) -> bool {
        if self.check_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume_ident(&mut self, name: &str) -> bool {
        if self.check_ident(name) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> PResult<Pos> {
        if self.check_punct(p) {
            Ok(self.advance().pos)
        } else {
            Err(self.unexpected())
        }
    }

    fn unexpected(&self) -> ParseError {
        let tok = self.peek();
        let message = match &tok.kind {
            TokenKind::Eof => "Unexpected end of input".to_string(),
            TokenKind::Ident(n) if RESERVED_WORDS.contains(&n.as_str()) => {
                format!("Unexpected token '{n}'")
            }
            TokenKind::Ident(n) => format!("Unexpected identifier '{n}'"),
            TokenKind::Number(_) => "Unexpected number".to_string(),
            TokenKind::Str(_) => "Unexpected string".to_string(),
            TokenKind::Template(_) => "Unexpected template string".to_string(),
            TokenKind::Punct(p) => format!("Unexpected token '{p}'"),
        };
        ParseError {
            message,
            pos: tok.pos,
        }
    }

    fn binding_name(&mut self) -> PResult<(String, Pos)> {
        let tok = self.peek();
        if let TokenKind::Ident(n) = &tok.kind {
            if !RESERVED_WORDS.contains(&n.as_str()) {
                let found = (n.clone(), tok.pos);
                self.advance();
                return Ok(found);
            }
        }
        Err(self.unexpected())
    }

    fn in_async(&self) -> bool {
        self.functions.last().copied().unwrap_or(false)
    }

    /// Automatic semicolon insertion at `;`, `}`, end of input or a line break.
    fn consume_semicolon(&mut self) -> PResult<()> {
        if self.consume_punct(";") || self.check_punct("}") || self.at_eof() {
            return Ok(());
        }
        if self.peek().newline_before {
            return Ok(());
        }
        Err(self.unexpected())
    }

    // ---- statements ----------------------------------------------------

    fn parse_statement(&mut self) -> PResult<Stmt> {
        self.nested(Self::statement)
    }

    fn statement(&mut self) -> PResult<Stmt> {
        if self.check_punct("{") {
            return Ok(Stmt::Block(self.parse_block()?));
        }
        if self.consume_punct(";") {
            return Ok(Stmt::Empty);
        }
        let TokenKind::Ident(word) = self.peek().kind.clone() else {
            return self.parse_expression_statement();
        };
        match word.as_str() {
            "const" | "let" | "var" => {
                let decl = self.parse_declaration()?;
                self.consume_semicolon()?;
                Ok(decl)
            }
            "function" => {
                let def = self.parse_function(false)?;
                Ok(Stmt::Function(def))
            }
            "async"
                if self.peek_at(1).is_ident("function") && !self.peek_at(1).newline_before =>
            {
                self.advance();
                let def = self.parse_function(true)?;
                Ok(Stmt::Function(def))
            }
            "return" => {
                self.advance();
                let arg = if self.check_punct(";")
                    || self.check_punct("}")
                    || self.at_eof()
                    || self.peek().newline_before
                {
                    None
                } else {
                    Some(self.parse_assignment()?)
                };
                self.consume_semicolon()?;
                Ok(Stmt::Return(arg))
            }
            "if" => {
                self.advance();
                self.expect_punct("(")?;
                let test = self.parse_assignment()?;
                self.expect_punct(")")?;
                let consequent = Box::new(self.parse_statement()?);
                let alternate = if self.consume_ident("else") {
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                Ok(Stmt::If {
                    test,
                    consequent,
                    alternate,
                })
            }
            "for" => self.parse_for(),
            "while" => {
                self.advance();
                self.expect_punct("(")?;
                let test = self.parse_assignment()?;
                self.expect_punct(")")?;
                let body = Box::new(self.parse_statement()?);
                Ok(Stmt::While { test, body })
            }
            "break" => {
                self.advance();
                self.consume_semicolon()?;
                Ok(Stmt::Break)
            }
            "continue" => {
                self.advance();
                self.consume_semicolon()?;
                Ok(Stmt::Continue)
            }
            "throw" => {
                self.advance();
                if self.peek().newline_before {
                    return Err(ParseError {
                        message: "Illegal newline after throw".into(),
                        pos: self.peek().pos,
                    });
                }
                let arg = self.parse_assignment()?;
                self.consume_semicolon()?;
                Ok(Stmt::Throw(arg))
            }
            "try" => self.parse_try(),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_expression_statement(&mut self) -> PResult<Stmt> {
        let expr = self.parse_assignment()?;
        self.consume_semicolon()?;
        Ok(Stmt::Expr(expr))
    }

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.check_punct("}") {
            if self.at_eof() {
                return Err(self.unexpected());
            }
            body.push(self.parse_statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn decl_kind(&mut self) -> Option<DeclKind> {
        let kind = match &self.peek().kind {
            TokenKind::Ident(w) if w == "const" => DeclKind::Const,
            TokenKind::Ident(w) if w == "let" => DeclKind::Let,
            TokenKind::Ident(w) if w == "var" => DeclKind::Var,
            _ => return None,
        };
        self.advance();
        Some(kind)
    }

    fn parse_declaration(&mut self) -> PResult<Stmt> {
        let Some(kind) = self.decl_kind() else {
            return Err(self.unexpected());
        };
        let mut decls = Vec::new();
        loop {
            let (name, pos) = self.binding_name()?;
            let init = if self.consume_punct("=") {
                Some(self.parse_assignment()?)
            } else if kind == DeclKind::Const {
                return Err(ParseError {
                    message: "Missing initializer in const declaration".into(),
                    pos: self.peek().pos,
                });
            } else {
                None
            };
            decls.push(Declarator { name, pos, init });
            if !self.consume_punct(",") {
                break;
            }
        }
        Ok(Stmt::Decl { kind, decls })
    }

    fn parse_for(&mut self) -> PResult<Stmt> {
        self.advance();
        self.expect_punct("(")?;
        let is_for_of = matches!(&self.peek().kind, TokenKind::Ident(w) if w == "const" || w == "let" || w == "var")
            && self.peek_at(2).is_ident("of");
        if is_for_of {
            let kind = self.decl_kind().unwrap_or(DeclKind::Let);
            let (name, pos) = self.binding_name()?;
            self.advance();
            let iterable = self.parse_assignment()?;
            self.expect_punct(")")?;
            let body = Box::new(self.parse_statement()?);
            return Ok(Stmt::ForOf {
                kind,
                name,
                pos,
                iterable,
                body,
            });
        }
        let init = if self.check_punct(";") {
            None
        } else if matches!(&self.peek().kind, TokenKind::Ident(w) if w == "const" || w == "let" || w == "var")
        {
            Some(Box::new(self.parse_declaration()?))
        } else {
            Some(Box::new(Stmt::Expr(self.parse_assignment()?)))
        };
        self.expect_punct(";")?;
        let test = if self.check_punct(";") {
            None
        } else {
            Some(self.parse_assignment()?)
        };
        self.expect_punct(";")?;
        let update = if self.check_punct(")") {
            None
        } else {
            Some(self.parse_assignment()?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    fn parse_try(&mut self) -> PResult<Stmt> {
        self.advance();
        let block = self.parse_block()?;
        let mut param = None;
        let mut handler = None;
        if self.consume_ident("catch") {
            if self.consume_punct("(") {
                param = Some(self.binding_name()?);
                self.expect_punct(")")?;
            }
            handler = Some(self.parse_block()?);
        }
        let finalizer = if self.consume_ident("finally") {
            Some(self.parse_block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(ParseError {
                message: "Missing catch or finally after try".into(),
                pos: self.peek().pos,
            });
        }
        Ok(Stmt::Try {
            block,
            param,
            handler,
            finalizer,
        })
    }

    // ---- functions -----------------------------------------------------

    /// `function [name](params) { body }`, positioned on the `function` keyword.
    fn parse_function(&mut self, is_async: bool) -> PResult<Rc<FunctionDef>> {
        let pos = self.advance().pos;
        let name = if self.check_punct("(") {
            None
        } else {
            Some(self.binding_name()?.0)
        };
        self.expect_punct("(")?;
        let params = self.parse_params()?;
        let body = self.parse_function_block(is_async)?;
        Ok(Rc::new(FunctionDef {
            name,
            params,
            body: FunctionBody::Block(body),
            is_async,
            is_arrow: false,
            pos,
        }))
    }

    /// Parameter list after the opening parenthesis, through the closing one.
    fn parse_params(&mut self) -> PResult<Vec<Param>> {
        let mut params = Vec::new();
        while !self.check_punct(")") {
            let (name, pos) = self.binding_name()?;
            let default = if self.consume_punct("=") {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            params.push(Param { name, pos, default });
            if !self.consume_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(params)
    }

    fn parse_function_block(&mut self, is_async: bool) -> PResult<Vec<Stmt>> {
        self.functions.push(is_async);
        let body = self.parse_block();
        self.functions.pop();
        body
    }

    /// Index of the `)` matching the `(` at `open`, if any.
    fn matching_paren(&self, open: usize) -> Option<usize> {
        let mut depth = 0usize;
        for (idx, tok) in self.tokens.iter().enumerate().skip(open) {
            match &tok.kind {
                TokenKind::Punct("(") => depth += 1,
                TokenKind::Punct(")") => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(idx);
                    }
                }
                TokenKind::Eof => return None,
                _ => {}
            }
        }
        None
    }

    fn is_arrow_at(&self, idx: usize) -> bool {
        let Some(tok) = self.tokens.get(idx) else {
            return false;
        };
        match &tok.kind {
            TokenKind::Ident(n) if !RESERVED_WORDS.contains(&n.as_str()) => self
                .tokens
                .get(idx + 1)
                .is_some_and(|t| t.is_punct("=>") && !t.newline_before),
            TokenKind::Punct("(") => self.matching_paren(idx).is_some_and(|close| {
                self.tokens
                    .get(close + 1)
                    .is_some_and(|t| t.is_punct("=>") && !t.newline_before)
            }),
            _ => false,
        }
    }

    fn parse_arrow(&mut self, is_async: bool) -> PResult<Expr> {
        let pos = self.peek().pos;
        let params = if self.consume_punct("(") {
            self.parse_params()?
        } else {
            let (name, pos) = self.binding_name()?;
            vec![Param {
                name,
                pos,
                default: None,
            }]
        };
        self.expect_punct("=>")?;
        let body = if self.check_punct("{") {
            FunctionBody::Block(self.parse_function_block(is_async)?)
        } else {
            self.functions.push(is_async);
            let expr = self.parse_assignment();
            self.functions.pop();
            FunctionBody::Expr(Box::new(expr?))
        };
        Ok(Expr::Function(Rc::new(FunctionDef {
            name: None,
            params,
            body,
            is_async,
            is_arrow: true,
            pos,
        })))
    }

    // ---- expressions ---------------------------------------------------

    fn parse_assignment(&mut self) -> PResult<Expr> {
        self.nested(Self::assignment)
    }

    fn assignment(&mut self) -> PResult<Expr> {
        if self.is_arrow_at(self.i) {
            return self.parse_arrow(false);
        }
        if self.check_ident("async")
            && !self.peek_at(1).newline_before
            && self.is_arrow_at(self.i + 1)
        {
            self.advance();
            return self.parse_arrow(true);
        }
        let pos = self.peek().pos;
        let target = self.parse_conditional()?;
        let op = match &self.peek().kind {
            TokenKind::Punct("=") => AssignOp::Assign,
            TokenKind::Punct("+=") => AssignOp::Compound(BinaryOp::Add),
            TokenKind::Punct("-=") => AssignOp::Compound(BinaryOp::Sub),
            TokenKind::Punct("*=") => AssignOp::Compound(BinaryOp::Mul),
            TokenKind::Punct("/=") => AssignOp::Compound(BinaryOp::Div),
            _ => return Ok(target),
        };
        if !matches!(target, Expr::Ident { .. } | Expr::Member { optional: false, .. }) {
            return Err(ParseError {
                message: "Invalid left-hand side in assignment".into(),
                pos,
            });
        }
        self.advance();
        let value = self.parse_assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
            pos,
        })
    }

    fn parse_conditional(&mut self) -> PResult<Expr> {
        let test = self.parse_or()?;
        if !self.consume_punct("?") {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.expect_punct(":")?;
        let alternate = self.parse_assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut left = self.parse_and()?;
        let mut links = 0;
        loop {
            let op = if self.consume_punct("||") {
                LogicalOp::Or
            } else if self.consume_punct("??") {
                LogicalOp::Nullish
            } else {
                break;
            };
            self.enter()?;
            links += 1;
            let right = self.parse_and()?;
            left = Expr::Logical {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut left = self.parse_equality()?;
        let mut links = 0;
        while self.consume_punct("&&") {
            self.enter()?;
            links += 1;
            let right = self.parse_equality()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_binary_level(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> PResult<Expr>,
    ) -> PResult<Expr> {
        let mut left = next(self)?;
        let mut links = 0;
        'outer: loop {
            for (text, op) in ops {
                let matched = match &self.peek().kind {
                    TokenKind::Punct(p) => p == text,
                    TokenKind::Ident(w) => w == text,
                    _ => false,
                };
                if matched {
                    self.advance();
                    self.enter()?;
                    links += 1;
                    let right = next(self)?;
                    left = Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            self.depth -= links;
            return Ok(left);
        }
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        self.parse_binary_level(
            &[
                ("===", BinaryOp::StrictEq),
                ("!==", BinaryOp::StrictNe),
                ("==", BinaryOp::Eq),
                ("!=", BinaryOp::Ne),
            ],
            Self::parse_relational,
        )
    }

    fn parse_relational(&mut self) -> PResult<Expr> {
        self.parse_binary_level(
            &[
                ("<=", BinaryOp::Le),
                (">=", BinaryOp::Ge),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
                ("instanceof", BinaryOp::Instanceof),
                ("in", BinaryOp::In),
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        self.parse_binary_level(
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        self.parse_binary_level(
            &[
                ("*", BinaryOp::Mul),
                ("/", BinaryOp::Div),
                ("%", BinaryOp::Mod),
            ],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let tok = self.peek().clone();
        let op = match &tok.kind {
            TokenKind::Punct("!") => Some(UnaryOp::Not),
            TokenKind::Punct("-") => Some(UnaryOp::Neg),
            TokenKind::Punct("+") => Some(UnaryOp::Plus),
            TokenKind::Ident(w) if w == "typeof" => Some(UnaryOp::Typeof),
            TokenKind::Ident(w) if w == "void" => Some(UnaryOp::Void),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let arg = self.nested(Self::parse_unary)?;
            return Ok(Expr::Unary {
                op,
                arg: Box::new(arg),
            });
        }
        if tok.is_punct("++") || tok.is_punct("--") {
            self.advance();
            let target = self.nested(Self::parse_unary)?;
            return self.update(target, tok.is_punct("++"), true, tok.pos);
        }
        if tok.is_ident("await") {
            if !self.in_async() {
                return Err(ParseError {
                    message: "await is only valid in async functions and the top level bodies of modules"
                        .into(),
                    pos: tok.pos,
                });
            }
            self.advance();
            let arg = self.nested(Self::parse_unary)?;
            return Ok(Expr::Await(Box::new(arg)));
        }
        self.parse_postfix()
    }

    fn update(&self, target: Expr, increment: bool, prefix: bool, pos: Pos) -> PResult<Expr> {
        if !matches!(target, Expr::Ident { .. } | Expr::Member { optional: false, .. }) {
            return Err(ParseError {
                message: "Invalid left-hand side expression in postfix operation".into(),
                pos,
            });
        }
        Ok(Expr::Update {
            increment,
            prefix,
            target: Box::new(target),
            pos,
        })
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let expr = self.parse_call_member()?;
        let tok = self.peek().clone();
        if (tok.is_punct("++") || tok.is_punct("--")) && !tok.newline_before {
            self.advance();
            return self.update(expr, tok.is_punct("++"), false, tok.pos);
        }
        Ok(expr)
    }

    fn parse_arguments(&mut self) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        while !self.check_punct(")") {
            if self.consume_punct("...") {
                args.push(Expr::Spread(Box::new(self.parse_assignment()?)));
            } else {
                args.push(self.parse_assignment()?);
            }
            if !self.consume_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(args)
    }

    fn property_name(&mut self) -> PResult<String> {
        let tok = self.advance();
        match tok.kind {
            TokenKind::Ident(n) => Ok(n),
            _ => Err(ParseError {
                message: format!("Unexpected token '{}'", tok.describe()),
                pos: tok.pos,
            }),
        }
    }

    fn parse_new(&mut self) -> PResult<Expr> {
        let pos = self.advance().pos;
        let mut callee = if self.check_ident("new") {
            self.nested(Self::parse_new)?
        } else {
            self.parse_primary()?
        };
        let mut links = 0;
        loop {
            if self.check_punct(".") || self.check_punct("[") {
                self.enter()?;
                links += 1;
            }
            if self.consume_punct(".") {
                let name_pos = self.peek().pos;
                let name = self.property_name()?;
                callee = Expr::Member {
                    object: Box::new(callee),
                    property: MemberProp::Named(name),
                    optional: false,
                    pos: name_pos,
                };
            } else if self.check_punct("[") {
                let bracket = self.advance().pos;
                let prop = self.parse_assignment()?;
                self.expect_punct("]")?;
                callee = Expr::Member {
                    object: Box::new(callee),
                    property: MemberProp::Computed(Box::new(prop)),
                    optional: false,
                    pos: bracket,
                };
            } else {
                break;
            }
        }
        self.depth -= links;
        let args = if self.consume_punct("(") {
            self.parse_arguments()?
        } else {
            Vec::new()
        };
        Ok(Expr::New {
            callee: Box::new(callee),
            args,
            pos,
        })
    }

    fn parse_call_member(&mut self) -> PResult<Expr> {
        let mut expr = if self.check_ident("new") {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        let mut links = 0;
        loop {
            let tok = self.peek().clone();
            if [".", "?.", "[", "("].iter().any(|p| tok.is_punct(p)) {
                self.enter()?;
                links += 1;
            }
            if tok.is_punct(".") {
                self.advance();
                let name_pos = self.peek().pos;
                let name = self.property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: MemberProp::Named(name),
                    optional: false,
                    pos: name_pos,
                };
            } else if tok.is_punct("?.") {
                self.advance();
                if self.consume_punct("(") {
                    let args = self.parse_arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        optional: true,
                        pos: tok.pos,
                    };
                } else if self.consume_punct("[") {
                    let prop = self.parse_assignment()?;
                    self.expect_punct("]")?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: MemberProp::Computed(Box::new(prop)),
                        optional: true,
                        pos: tok.pos,
                    };
                } else {
                    let name_pos = self.peek().pos;
                    let name = self.property_name()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: MemberProp::Named(name),
                        optional: true,
                        pos: name_pos,
                    };
                }
            } else if tok.is_punct("[") {
                self.advance();
                let prop = self.parse_assignment()?;
                self.expect_punct("]")?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: MemberProp::Computed(Box::new(prop)),
                    optional: false,
                    pos: tok.pos,
                };
            } else if tok.is_punct("(") {
                self.advance();
                let args = self.parse_arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    optional: false,
                    pos: tok.pos,
                };
            } else {
                self.depth -= links;
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            TokenKind::Template(chunks) => {
                self.advance();
                self.parse_template(chunks)
            }
            TokenKind::Punct("(") => {
                self.advance();
                let expr = self.parse_assignment()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            TokenKind::Punct("[") => {
                self.advance();
                let mut items = Vec::new();
                while !self.check_punct("]") {
                    if self.consume_punct("...") {
                        items.push(Expr::Spread(Box::new(self.parse_assignment()?)));
                    } else {
                        items.push(self.parse_assignment()?);
                    }
                    if !self.consume_punct(",") {
                        break;
                    }
                }
                self.expect_punct("]")?;
                Ok(Expr::Array(items))
            }
            TokenKind::Punct("{") => self.parse_object(),
            TokenKind::Ident(ref word) => match word.as_str() {
                "true" => {
                    self.advance();
                    Ok(Expr::Bool(true))
                }
                "false" => {
                    self.advance();
                    Ok(Expr::Bool(false))
                }
                "null" => {
                    self.advance();
                    Ok(Expr::Null)
                }
                "this" => {
                    self.advance();
                    Ok(Expr::This)
                }
                "function" => Ok(Expr::Function(self.parse_function(false)?)),
                "async" if self.peek_at(1).is_ident("function") => {
                    self.advance();
                    Ok(Expr::Function(self.parse_function(true)?))
                }
                w if RESERVED_WORDS.contains(&w) => Err(self.unexpected()),
                _ => {
                    self.advance();
                    Ok(Expr::Ident {
                        name: word.clone(),
                        pos: tok.pos,
                    })
                }
            },
            _ => Err(self.unexpected()),
        }
    }

    fn parse_object(&mut self) -> PResult<Expr> {
        self.expect_punct("{")?;
        let mut entries = Vec::new();
        while !self.check_punct("}") {
            if self.consume_punct("...") {
                entries.push(ObjectEntry::Spread(self.parse_assignment()?));
            } else {
                let tok = self.advance();
                let key = match tok.kind {
                    TokenKind::Ident(ref n) => PropKey::Named(n.clone()),
                    TokenKind::Str(ref s) => PropKey::Named(s.clone()),
                    TokenKind::Number(n) => PropKey::Named(crate::value::number_to_string(n)),
                    TokenKind::Punct("[") => {
                        let expr = self.parse_assignment()?;
                        self.expect_punct("]")?;
                        PropKey::Computed(expr)
                    }
                    _ => {
                        return Err(ParseError {
                            message: format!("Unexpected token '{}'", tok.describe()),
                            pos: tok.pos,
                        })
                    }
                };
                let value = if self.consume_punct(":") {
                    self.parse_assignment()?
                } else if self.consume_punct("(") {
                    let params = self.parse_params()?;
                    let body = self.parse_function_block(false)?;
                    let name = match &key {
                        PropKey::Named(n) => Some(n.clone()),
                        PropKey::Computed(_) => None,
                    };
                    Expr::Function(Rc::new(FunctionDef {
                        name,
                        params,
                        body: FunctionBody::Block(body),
                        is_async: false,
                        is_arrow: false,
                        pos: tok.pos,
                    }))
                } else {
                    match (&tok.kind, &key) {
                        (TokenKind::Ident(n), PropKey::Named(_))
                            if !RESERVED_WORDS.contains(&n.as_str()) =>
                        {
                            Expr::Ident {
                                name: n.clone(),
                                pos: tok.pos,
                            }
                        }
                        _ => return Err(self.unexpected()),
                    }
                };
                entries.push(ObjectEntry::Prop(key, value));
            }
            if !self.consume_punct(",") {
                break;
            }
        }
        self.expect_punct("}")?;
        Ok(Expr::Object(entries))
    }

    fn parse_template(&mut self, chunks: Vec<TemplateChunk>) -> PResult<Expr> {
        let mut parts = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            match chunk {
                TemplateChunk::Text(t) => parts.push(TemplatePart::Text(t)),
                TemplateChunk::Expr { source, pos } => {
                    let tokens = Lexer::with_origin(&source, pos).tokenize()?;
                    let mut sub = Parser::new(tokens, self.in_async());
                    sub.depth = self.depth;
                    let expr = sub.parse_assignment()?;
                    if !sub.at_eof() {
                        return Err(sub.unexpected());
                    }
                    parts.push(TemplatePart::Expr(expr));
                }
            }
        }
        Ok(Expr::Template(parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn precedence_binds_multiplication_tighter() {
        let expr = parse_expression("1 + 2 * 3").unwrap();
        let Expr::Binary { op, right, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn arrow_functions_with_params_and_block_bodies() {
        let expr = parse_expression("(a, b = 2) => { return a + b }").unwrap();
        let Expr::Function(def) = expr else {
            panic!("expected function");
        };
        assert!(def.is_arrow);
        assert_eq!(def.params.len(), 2);
        assert!(def.params[1].default.is_some());
        assert!(matches!(def.body, FunctionBody::Block(_)));
    }

    #[test]
    fn async_arrow_allows_await() {
        let expr = parse_expression("async () => await fetchIt()").unwrap();
        let Expr::Function(def) = expr else {
            panic!("expected function");
        };
        assert!(def.is_async);
        assert!(matches!(def.body, FunctionBody::Expr(ref e) if matches!(**e, Expr::Await(_))));
    }

    #[test]
    fn await_outside_async_is_rejected() {
        let err = parse_expression("await x").unwrap_err();
        assert!(err.message.starts_with("await is only valid"));
        assert!(matches!(parse_async_expression("await x"), Ok(Expr::Await(_))));
    }

    #[test]
    fn statements_without_semicolons_use_line_breaks() {
        let program = parse_program("const a = 1\nconst b = a\nb").unwrap();
        assert_eq!(program.body.len(), 3);
    }

    #[test]
    fn missing_operand_reports_position() {
        let err = parse_program("const x = (1 +\n)").unwrap_err();
        assert_eq!(err.message, "Unexpected token ')'");
        assert_eq!(err.pos, Pos { line: 2, col: 1 });
    }

    #[test]
    fn optional_call_and_member() {
        let expr = parse_expression("fn?.apply(a, b)?.c").unwrap();
        let Expr::Member { optional, object, .. } = expr else {
            panic!("expected member");
        };
        assert!(optional);
        assert!(matches!(*object, Expr::Call { .. }));
    }

    #[test]
    fn object_literal_shorthand_spread_and_methods() {
        let expr = parse_expression("({ a, ...rest, 'b': 1, [k]: 2, m() { return 3 } })").unwrap();
        let Expr::Object(entries) = expr else {
            panic!("expected object");
        };
        assert_eq!(entries.len(), 5);
        assert!(matches!(entries[1], ObjectEntry::Spread(_)));
    }

    #[test]
    fn nesting_past_the_limit_is_rejected() {
        let parens = format!("{}1{}", "(".repeat(150), ")".repeat(150));
        assert_eq!(parse_expression(&parens), Ok(Expr::Number(1.0)));

        let arrays = format!("{}1{}", "[".repeat(1000), "]".repeat(1000));
        let err = parse_expression(&arrays).unwrap_err();
        assert_eq!(err.message, "Maximum nesting depth of 256 exceeded");

        let chain = format!("1{}", " + 1".repeat(500));
        assert!(parse_program(&chain).is_err());
        let blocks = format!("{}{}", "{".repeat(300), "}".repeat(300));
        assert!(parse_program(&blocks).is_err());
    }

    #[test]
    fn for_of_and_try_catch() {
        let src = "for (const x of xs) { total += x }\ntry { f() } catch (e) { g(e) } finally { h() }";
        let program = parse_program(src).unwrap();
        assert!(matches!(program.body[0], Stmt::ForOf { .. }));
        assert!(matches!(program.body[1], Stmt::Try { handler: Some(_), finalizer: Some(_), .. }));
    }
}
