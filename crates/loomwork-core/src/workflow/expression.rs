//! Expression Evaluator: a small hand-rolled grammar for step conditions,
//! approval `auto_approve_if` rules, quality-check `score_expression`s, and
//! agent-switch rules.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! expr       := or_expr
//! or_expr    := and_expr ( "||" and_expr )*
//! and_expr   := unary ( "&&" unary )*
//! unary      := "!" unary | comparison
//! comparison := call_or_path ( ("==" | "!=" | "<" | "<=" | ">" | ">=") call_or_path )?
//! call_or_path := IDENT "(" ( arg ("," arg)* )? ")" | path | literal
//! path       := IDENT ( "." IDENT )*
//! literal    := STRING | NUMBER | "true" | "false" | "null"
//! ```
//!
//! Paths resolve against a JSON context object (`{"steps": ..., "trigger":
//! ..., "variables": ..., "workflow": ...}`) one segment at a time. Named
//! functions: `any_of`, `all_of`, `none_of`, `contains`, `empty`,
//! `not_empty`, `len`.

use serde_json::Value;
use thiserror::Error;

use super::context::ExecutionContext;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ExpressionError {
    #[error("expression syntax error: {0}")]
    Syntax(String),

    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    String(String),
    Number(f64),
    True,
    False,
    Null,
    Dot,
    Comma,
    LParen,
    RParen,
    AndAnd,
    OrOr,
    Bang,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Eof,
}

fn tokenize(src: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut tokens = Vec::new();

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '{' if chars.get(i + 1) == Some(&'{') => {
                i += 2;
                let start = i;
                while i < chars.len() && !(chars[i] == '}' && chars.get(i + 1) == Some(&'}')) {
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(ExpressionError::Syntax(
                        "unterminated '{{' path reference".to_string(),
                    ));
                }
                let inner: String = chars[start..i].iter().collect();
                i += 2;
                let mut segments = inner.split('.').map(str::trim);
                let first = segments.next().ok_or_else(|| {
                    ExpressionError::Syntax("empty '{{}}' path reference".to_string())
                })?;
                tokens.push(Token::Ident(first.to_string()));
                for seg in segments {
                    tokens.push(Token::Dot);
                    tokens.push(Token::Ident(seg.to_string()));
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Eq);
                    i += 2;
                } else {
                    return Err(ExpressionError::Syntax(format!(
                        "unexpected '=' at position {i}"
                    )));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::AndAnd);
                    i += 2;
                } else {
                    return Err(ExpressionError::Syntax(format!(
                        "unexpected '&' at position {i}"
                    )));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::OrOr);
                    i += 2;
                } else {
                    return Err(ExpressionError::Syntax(format!(
                        "unexpected '|' at position {i}"
                    )));
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(ExpressionError::Syntax("unterminated string".to_string()));
                }
                i += 1;
                tokens.push(Token::String(s));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let num_str: String = chars[start..i].iter().collect();
                let num = num_str
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::Syntax(format!("invalid number '{num_str}'")))?;
                tokens.push(Token::Number(num));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" | "nil" => Token::Null,
                    _ => Token::Ident(word),
                });
            }
            other => {
                return Err(ExpressionError::Syntax(format!(
                    "unexpected character '{other}' at position {i}"
                )));
            }
        }
    }
    tokens.push(Token::Eof);
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Ast {
    Literal(Value),
    Path(Vec<String>),
    Call(String, Vec<Ast>),
    Not(Box<Ast>),
    And(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
    Compare(CompareOp, Box<Ast>, Box<Ast>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExpressionError> {
        if self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(ExpressionError::Syntax(format!(
                "expected {:?}, found {:?}",
                expected,
                self.peek()
            )))
        }
    }

    fn parse_expr(&mut self) -> Result<Ast, ExpressionError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Ast, ExpressionError> {
        let mut left = self.parse_and()?;
        while *self.peek() == Token::OrOr {
            self.advance();
            let right = self.parse_and()?;
            left = Ast::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Ast, ExpressionError> {
        let mut left = self.parse_unary()?;
        while *self.peek() == Token::AndAnd {
            self.advance();
            let right = self.parse_unary()?;
            left = Ast::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Ast, ExpressionError> {
        if *self.peek() == Token::Bang {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Ast::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Ast, ExpressionError> {
        let left = self.parse_primary()?;
        let op = match self.peek() {
            Token::Eq => CompareOp::Eq,
            Token::Ne => CompareOp::Ne,
            Token::Lt => CompareOp::Lt,
            Token::Le => CompareOp::Le,
            Token::Gt => CompareOp::Gt,
            Token::Ge => CompareOp::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_primary()?;
        Ok(Ast::Compare(op, Box::new(left), Box::new(right)))
    }

    fn parse_primary(&mut self) -> Result<Ast, ExpressionError> {
        match self.advance() {
            Token::True => Ok(Ast::Literal(Value::Bool(true))),
            Token::False => Ok(Ast::Literal(Value::Bool(false))),
            Token::Null => Ok(Ast::Literal(Value::Null)),
            Token::String(s) => Ok(Ast::Literal(Value::String(s))),
            Token::Number(n) => Ok(Ast::Literal(
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if *self.peek() == Token::LParen {
                    self.advance();
                    let mut args = Vec::new();
                    if *self.peek() != Token::RParen {
                        args.push(self.parse_expr()?);
                        while *self.peek() == Token::Comma {
                            self.advance();
                            args.push(self.parse_expr()?);
                        }
                    }
                    self.expect(&Token::RParen)?;
                    Ok(Ast::Call(name, args))
                } else {
                    let mut path = vec![name];
                    while *self.peek() == Token::Dot {
                        self.advance();
                        match self.advance() {
                            Token::Ident(seg) => path.push(seg),
                            other => {
                                return Err(ExpressionError::Syntax(format!(
                                    "expected identifier after '.', found {other:?}"
                                )))
                            }
                        }
                    }
                    Ok(Ast::Path(path))
                }
            }
            other => Err(ExpressionError::Syntax(format!(
                "unexpected token {other:?}"
            ))),
        }
    }
}

fn parse(src: &str) -> Result<Ast, ExpressionError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser::new(tokens);
    let ast = parser.parse_expr()?;
    if *parser.peek() != Token::Eof {
        return Err(ExpressionError::Syntax(format!(
            "unexpected trailing tokens starting at {:?}",
            parser.peek()
        )));
    }
    Ok(ast)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn resolve_path<'a>(root: &'a Value, path: &[String]) -> &'a Value {
    let mut current = root;
    for segment in path {
        current = match current.get(segment) {
            Some(v) => v,
            None => return &Value::Null,
        };
    }
    current
}

/// JS-style truthiness: nil/false/0/""/empty-array/empty-object are falsy.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            matches!((as_f64(a), as_f64(b)), (Some(x), Some(y)) if x == y)
        }
        _ => false,
    }
}

fn compare(op: CompareOp, a: &Value, b: &Value) -> Result<bool, ExpressionError> {
    Ok(match op {
        CompareOp::Eq => values_equal(a, b),
        CompareOp::Ne => !values_equal(a, b),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            if matches!(a, Value::Bool(_)) || matches!(b, Value::Bool(_)) {
                return Err(ExpressionError::EvalFailed(
                    "booleans only support == and !=".to_string(),
                ));
            }
            if matches!(a, Value::Null) || matches!(b, Value::Null) {
                return Err(ExpressionError::EvalFailed(
                    "nil is incomparable with <, <=, >, >=".to_string(),
                ));
            }
            let (x, y) = match (as_f64(a), as_f64(b)) {
                (Some(x), Some(y)) => (x, y),
                _ => {
                    return Err(ExpressionError::EvalFailed(format!(
                        "cannot compare non-numeric values {a:?} and {b:?}"
                    )))
                }
            };
            match op {
                CompareOp::Lt => x < y,
                CompareOp::Le => x <= y,
                CompareOp::Gt => x > y,
                CompareOp::Ge => x >= y,
                _ => unreachable!(),
            }
        }
    })
}

fn call_function(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    match name {
        // Logical composition over the truthiness of each argument expression.
        "any_of" => Ok(Value::Bool(args.iter().any(is_truthy))),
        "all_of" => {
            if args.is_empty() {
                return Err(ExpressionError::EvalFailed(
                    "all_of requires at least one argument".to_string(),
                ));
            }
            Ok(Value::Bool(args.iter().all(is_truthy)))
        }
        "none_of" => Ok(Value::Bool(!args.iter().any(is_truthy))),
        "contains" => {
            let haystack = args.first().ok_or_else(|| {
                ExpressionError::EvalFailed("contains requires 2 arguments".to_string())
            })?;
            let needle = args.get(1).ok_or_else(|| {
                ExpressionError::EvalFailed("contains requires 2 arguments".to_string())
            })?;
            let found = match haystack {
                Value::Array(items) => items.iter().any(|v| values_equal(v, needle)),
                Value::String(s) => needle.as_str().is_some_and(|n| s.contains(n)),
                Value::Object(map) => needle.as_str().is_some_and(|k| map.contains_key(k)),
                _ => false,
            };
            Ok(Value::Bool(found))
        }
        "empty" => {
            let v = args
                .first()
                .ok_or_else(|| ExpressionError::EvalFailed("empty requires 1 argument".to_string()))?;
            Ok(Value::Bool(!is_truthy(v) || value_len(v) == 0))
        }
        "not_empty" => {
            let v = args.first().ok_or_else(|| {
                ExpressionError::EvalFailed("not_empty requires 1 argument".to_string())
            })?;
            Ok(Value::Bool(is_truthy(v) && value_len(v) > 0))
        }
        "len" => {
            let v = args
                .first()
                .ok_or_else(|| ExpressionError::EvalFailed("len requires 1 argument".to_string()))?;
            Ok(Value::Number(value_len(v).into()))
        }
        other => Err(ExpressionError::UnknownFunction(other.to_string())),
    }
}

fn value_len(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::String(s) => s.chars().count(),
        Value::Array(a) => a.len(),
        Value::Object(o) => o.len(),
        _ => 1,
    }
}

fn eval_ast(ast: &Ast, root: &Value) -> Result<Value, ExpressionError> {
    Ok(match ast {
        Ast::Literal(v) => v.clone(),
        Ast::Path(segments) => resolve_path(root, segments).clone(),
        Ast::Call(name, arg_asts) => {
            let args = arg_asts
                .iter()
                .map(|a| eval_ast(a, root))
                .collect::<Result<Vec<_>, _>>()?;
            call_function(name, &args)?
        }
        Ast::Not(inner) => Value::Bool(!is_truthy(&eval_ast(inner, root)?)),
        Ast::And(l, r) => {
            let lv = eval_ast(l, root)?;
            if !is_truthy(&lv) {
                Value::Bool(false)
            } else {
                Value::Bool(is_truthy(&eval_ast(r, root)?))
            }
        }
        Ast::Or(l, r) => {
            let lv = eval_ast(l, root)?;
            if is_truthy(&lv) {
                Value::Bool(true)
            } else {
                Value::Bool(is_truthy(&eval_ast(r, root)?))
            }
        }
        Ast::Compare(op, l, r) => {
            let lv = eval_ast(l, root)?;
            let rv = eval_ast(r, root)?;
            Value::Bool(compare(*op, &lv, &rv)?)
        }
    })
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Evaluates condition/auto-approve/score/switch-rule expressions against a
/// workflow's execution context.
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkflowEvaluator;

impl WorkflowEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate an expression to a raw JSON value against an arbitrary context.
    pub fn evaluate_value(&self, expr: &str, context: &Value) -> Result<Value, ExpressionError> {
        let ast = parse(expr)?;
        eval_ast(&ast, context)
    }

    /// Evaluate an expression and coerce the result to a boolean via
    /// JS-style truthiness.
    pub fn evaluate_bool(&self, expr: &str, context: &Value) -> Result<bool, ExpressionError> {
        let value = self.evaluate_value(expr, context)?;
        Ok(is_truthy(&value))
    }

    /// Evaluate a boolean expression against an `ExecutionContext` snapshot.
    pub fn evaluate_in_context(
        &self,
        expr: &str,
        ctx: &ExecutionContext,
    ) -> Result<bool, ExpressionError> {
        self.evaluate_bool(expr, &ctx.to_expression_context())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
