//! Condition Engine: evaluates guard expressions against instance data
//!
//! Guards are small boolean expressions over the instance's JSON data:
//!
//! ```text
//! amount > 1000 AND (department == 'finance' OR priority IN ['high', 'urgent'])
//! NOT vendor.blocked && vendor.tier NOT IN ["bronze"]
//! ```
//!
//! Fields are dotted paths into the data; an absent field reads as
//! `null`. Keywords are case-insensitive. Ordering operators only apply
//! to two numbers or two strings; any other pairing evaluates to false.

use serde_json::{Map, Value};
use std::cmp::Ordering;
use workflow_types::{WorkflowError, WorkflowResult};

// ── Tokens ───────────────────────────────────────────────────────────

/// A token produced by the condition lexer
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// The raw text (unquoted for strings)
    pub text: String,
    /// Column number (1-based)
    pub col: usize,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, col: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            col,
        }
    }
}

/// Token types
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords
    And,
    Or,
    Not,
    In,
    True,
    False,
    Null,

    // Identifiers and literals
    Field,
    StringLiteral,
    NumberLiteral,

    // Comparison operators
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,

    // Structural
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    Comma,

    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::And => "AND",
            Self::Or => "OR",
            Self::Not => "NOT",
            Self::In => "IN",
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
            Self::Field => "field",
            Self::StringLiteral => "string literal",
            Self::NumberLiteral => "number",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::OpenParen => "(",
            Self::CloseParen => ")",
            Self::OpenBracket => "[",
            Self::CloseBracket => "]",
            Self::Comma => ",",
            Self::Eof => "end of expression",
        };
        write!(f, "{}", s)
    }
}

// ── Lexer ────────────────────────────────────────────────────────────

struct Lexer<'a> {
    expression: &'a str,
    input: Vec<char>,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(expression: &'a str) -> Self {
        Self {
            expression,
            input: expression.chars().collect(),
            pos: 0,
        }
    }

    fn tokenize(&mut self) -> WorkflowResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            while self.peek_at(0).map(char::is_whitespace).unwrap_or(false) {
                self.pos += 1;
            }
            if self.pos >= self.input.len() {
                tokens.push(Token::new(TokenKind::Eof, "", self.pos + 1));
                break;
            }
            tokens.push(self.next_token()?);
        }
        Ok(tokens)
    }

    fn next_token(&mut self) -> WorkflowResult<Token> {
        let ch = self.input[self.pos];
        let col = self.pos + 1;

        match ch {
            '(' => self.emit(TokenKind::OpenParen, "(", col),
            ')' => self.emit(TokenKind::CloseParen, ")", col),
            '[' => self.emit(TokenKind::OpenBracket, "[", col),
            ']' => self.emit(TokenKind::CloseBracket, "]", col),
            ',' => self.emit(TokenKind::Comma, ",", col),
            '=' if self.peek_at(1) == Some('=') => self.emit(TokenKind::Eq, "==", col),
            '!' if self.peek_at(1) == Some('=') => self.emit(TokenKind::Ne, "!=", col),
            '!' => self.emit(TokenKind::Not, "!", col),
            '>' if self.peek_at(1) == Some('=') => self.emit(TokenKind::Ge, ">=", col),
            '>' => self.emit(TokenKind::Gt, ">", col),
            '<' if self.peek_at(1) == Some('=') => self.emit(TokenKind::Le, "<=", col),
            '<' => self.emit(TokenKind::Lt, "<", col),
            '&' if self.peek_at(1) == Some('&') => self.emit(TokenKind::And, "&&", col),
            '|' if self.peek_at(1) == Some('|') => self.emit(TokenKind::Or, "||", col),
            '\'' | '"' => self.read_string(ch),
            '-' if self.peek_at(1).map(|c| c.is_ascii_digit()).unwrap_or(false) => {
                self.read_number()
            }
            c if c.is_ascii_digit() => self.read_number(),
            c if c.is_ascii_alphabetic() || c == '_' => Ok(self.read_word()),
            _ => Err(self.error(format!("unexpected character '{}' at column {}", ch, col))),
        }
    }

    fn emit(&mut self, kind: TokenKind, text: &str, col: usize) -> WorkflowResult<Token> {
        self.pos += text.chars().count();
        Ok(Token::new(kind, text, col))
    }

    fn read_string(&mut self, quote: char) -> WorkflowResult<Token> {
        let col = self.pos + 1;
        self.pos += 1; // opening quote

        let mut text = String::new();
        loop {
            match self.peek_at(0) {
                None => {
                    return Err(self.error(format!(
                        "unterminated string starting at column {}",
                        col
                    )))
                }
                Some(c) if c == quote => break,
                Some('\\') if self.peek_at(1).is_some() => {
                    self.pos += 1;
                    text.push(self.input[self.pos]);
                }
                Some(c) => text.push(c),
            }
            self.pos += 1;
        }
        self.pos += 1; // closing quote
        Ok(Token::new(TokenKind::StringLiteral, text, col))
    }

    fn read_number(&mut self) -> WorkflowResult<Token> {
        let col = self.pos + 1;
        let mut text = String::new();
        if self.input[self.pos] == '-' {
            text.push('-');
            self.pos += 1;
        }
        let mut seen_dot = false;
        while let Some(c) = self.peek_at(0) {
            if c.is_ascii_digit() {
                text.push(c);
            } else if c == '.' && !seen_dot {
                seen_dot = true;
                text.push(c);
            } else {
                break;
            }
            self.pos += 1;
        }
        if text.ends_with('.') {
            return Err(self.error(format!("malformed number '{}' at column {}", text, col)));
        }
        Ok(Token::new(TokenKind::NumberLiteral, text, col))
    }

    fn read_word(&mut self) -> Token {
        let col = self.pos + 1;
        let mut text = String::new();
        while let Some(c) = self.peek_at(0) {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                text.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }

        let kind = match text.to_ascii_lowercase().as_str() {
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "in" => TokenKind::In,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            _ => TokenKind::Field,
        };
        Token::new(kind, text, col)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }

    fn error(&self, message: String) -> WorkflowError {
        invalid(self.expression, message)
    }
}

fn invalid(expression: &str, message: impl Into<String>) -> WorkflowError {
    WorkflowError::InvalidExpression {
        expression: expression.to_string(),
        message: message.into(),
    }
}

// ── AST ──────────────────────────────────────────────────────────────

/// Comparison operators
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

/// A parsed guard expression
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Or(Box<Condition>, Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    In {
        field: String,
        values: Vec<Value>,
        negated: bool,
    },
}

impl Condition {
    /// Evaluate against a data context; absent fields read as null
    pub fn evaluate(&self, context: &Map<String, Value>) -> bool {
        match self {
            Self::Or(left, right) => left.evaluate(context) || right.evaluate(context),
            Self::And(left, right) => left.evaluate(context) && right.evaluate(context),
            Self::Not(inner) => !inner.evaluate(context),
            Self::Compare { field, op, value } => {
                let actual = lookup_path(context, field).unwrap_or(&Value::Null);
                compare(actual, *op, value)
            }
            Self::In {
                field,
                values,
                negated,
            } => {
                let actual = lookup_path(context, field).unwrap_or(&Value::Null);
                let found = values.iter().any(|v| values_equal(actual, v));
                found != *negated
            }
        }
    }

    /// Dotted field paths referenced by this condition
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Self::Or(l, r) | Self::And(l, r) => {
                let mut fields = l.fields();
                fields.extend(r.fields());
                fields
            }
            Self::Not(inner) => inner.fields(),
            Self::Compare { field, .. } | Self::In { field, .. } => vec![field.as_str()],
        }
    }
}

/// Resolve a dotted path (`vendor.rating.score`) inside a JSON object
pub fn lookup_path<'v>(context: &'v Map<String, Value>, path: &str) -> Option<&'v Value> {
    let mut segments = path.split('.');
    let mut current = context.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) if left.is_number() && right.is_number() => a == b,
        _ => left == right,
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    match op {
        CompareOp::Eq => return values_equal(left, right),
        CompareOp::Ne => return !values_equal(left, right),
        _ => {}
    }

    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };

    match ordering {
        Some(ordering) => match op {
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Eq | CompareOp::Ne => false,
        },
        None => false,
    }
}

// ── Parser ───────────────────────────────────────────────────────────

struct Parser<'a> {
    expression: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn parse(expression: &'a str) -> WorkflowResult<Condition> {
        let tokens = Lexer::new(expression).tokenize()?;
        let mut parser = Self {
            expression,
            tokens,
            pos: 0,
        };

        if parser.check(TokenKind::Eof) {
            return Err(invalid(expression, "empty expression"));
        }
        let condition = parser.parse_or()?;
        if !parser.check(TokenKind::Eof) {
            let token = parser.peek();
            return Err(invalid(
                expression,
                format!(
                    "unexpected '{}' at column {} after complete expression",
                    token.text, token.col
                ),
            ));
        }
        Ok(condition)
    }

    fn parse_or(&mut self) -> WorkflowResult<Condition> {
        let mut left = self.parse_and()?;
        while self.check(TokenKind::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> WorkflowResult<Condition> {
        let mut left = self.parse_unary()?;
        while self.check(TokenKind::And) {
            self.advance();
            let right = self.parse_unary()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> WorkflowResult<Condition> {
        if self.check(TokenKind::Not) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Condition::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> WorkflowResult<Condition> {
        match self.peek().kind {
            TokenKind::OpenParen => {
                self.advance();
                let inner = self.parse_or()?;
                self.expect(TokenKind::CloseParen)?;
                Ok(inner)
            }
            TokenKind::Field => {
                let field = self.advance().text;
                self.parse_predicate(field)
            }
            _ => Err(self.unexpected("a field or '('")),
        }
    }

    fn parse_predicate(&mut self, field: String) -> WorkflowResult<Condition> {
        let op = match self.peek().kind {
            TokenKind::Eq => CompareOp::Eq,
            TokenKind::Ne => CompareOp::Ne,
            TokenKind::Gt => CompareOp::Gt,
            TokenKind::Lt => CompareOp::Lt,
            TokenKind::Ge => CompareOp::Ge,
            TokenKind::Le => CompareOp::Le,
            TokenKind::In => {
                self.advance();
                let values = self.parse_list()?;
                return Ok(Condition::In {
                    field,
                    values,
                    negated: false,
                });
            }
            TokenKind::Not => {
                self.advance();
                self.expect(TokenKind::In)?;
                let values = self.parse_list()?;
                return Ok(Condition::In {
                    field,
                    values,
                    negated: true,
                });
            }
            _ => {
                return Err(self.unexpected(&format!(
                    "a comparison operator after field '{}'",
                    field
                )))
            }
        };
        self.advance();
        let value = self.parse_literal()?;
        Ok(Condition::Compare { field, op, value })
    }

    fn parse_list(&mut self) -> WorkflowResult<Vec<Value>> {
        self.expect(TokenKind::OpenBracket)?;
        let mut values = vec![self.parse_literal()?];
        while self.check(TokenKind::Comma) {
            self.advance();
            values.push(self.parse_literal()?);
        }
        self.expect(TokenKind::CloseBracket)?;
        Ok(values)
    }

    fn parse_literal(&mut self) -> WorkflowResult<Value> {
        let token = self.peek().clone();
        let value = match token.kind {
            TokenKind::StringLiteral => Value::String(token.text.clone()),
            TokenKind::True => Value::Bool(true),
            TokenKind::False => Value::Bool(false),
            TokenKind::Null => Value::Null,
            TokenKind::NumberLiteral => self.number(&token)?,
            _ => return Err(self.unexpected("a literal")),
        };
        self.advance();
        Ok(value)
    }

    fn number(&self, token: &Token) -> WorkflowResult<Value> {
        if let Ok(n) = token.text.parse::<i64>() {
            return Ok(Value::from(n));
        }
        token
            .text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| {
                invalid(
                    self.expression,
                    format!("number '{}' out of range", token.text),
                )
            })
    }

    fn peek(&self) -> &Token {
        // tokenize always ends with Eof, and advance never moves past it
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, kind: TokenKind) -> WorkflowResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("'{}'", kind)))
        }
    }

    fn unexpected(&self, expected: &str) -> WorkflowError {
        let token = self.peek();
        let found = if token.kind == TokenKind::Eof {
            token.kind.to_string()
        } else {
            format!("'{}'", token.text)
        };
        invalid(
            self.expression,
            format!("expected {} at column {}, found {}", expected, token.col, found),
        )
    }
}

// ── Engine ───────────────────────────────────────────────────────────

/// Parses and evaluates guard expressions
#[derive(Clone, Debug, Default)]
pub struct ConditionEngine;

impl ConditionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Parse an expression into its syntax tree
    pub fn parse(&self, expression: &str) -> WorkflowResult<Condition> {
        Parser::parse(expression)
    }

    /// Evaluate an expression against a data context
    pub fn evaluate(&self, expression: &str, context: &Map<String, Value>) -> WorkflowResult<bool> {
        Ok(self.parse(expression)?.evaluate(context))
    }

    /// Check that an expression parses, without evaluating it
    pub fn validate(&self, expression: &str) -> WorkflowResult<()> {
        self.parse(expression).map(|_| ())
    }
}
