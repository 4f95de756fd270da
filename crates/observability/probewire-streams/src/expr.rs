//! Record expressions used by queries.
//!
//! A small, side-effect free language evaluated against one JSON record:
//! bare identifiers name fields of the record, `_` is the record itself.
//! There are no function calls and no access to anything but the record.
//!
//! ```
//! use probewire_streams::expr::Expr;
//! use serde_json::json;
//!
//! let expr: Expr = "args[0] * 100 / args[1]".parse().unwrap();
//! let record = json!({"args": [3, 4]});
//! assert_eq!(expr.evaluate(&record).unwrap(), json!(75));
//! ```

use probewire_core::{ProbeWireError, ProbeWireResult};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

type NativeFn = Arc<dyn Fn(&Value) -> ProbeWireResult<Value> + Send + Sync>;

/// Normalise a float into a JSON value: integral values become integers,
/// non-finite values become `null`
#[must_use] pub fn number_value(n: f64) -> Value {
    if !n.is_finite() {
        return Value::Null;
    }
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        return Value::from(n as i64);
    }
    serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
}

/// Truthiness of a value: `null`, `false`, `0`, `NaN` and `""` are false
#[must_use] pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Compiled expression or caller supplied function
#[derive(Clone)]
pub struct Expr {
    source: String,
    kind: ExprKind,
}

#[derive(Clone)]
enum ExprKind {
    Ast(Node),
    Native(NativeFn),
}

impl Expr {
    /// Parse `source`
    pub fn parse(source: &str) -> ProbeWireResult<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0, depth: 0, source };
        let node = parser.expression()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.unexpected());
        }
        Ok(Self { source: source.trim().to_string(), kind: ExprKind::Ast(node) })
    }

    /// Wrap a typed callback; `name` is used in diagnostics
    pub fn from_fn<F>(name: &str, f: F) -> Self
    where
        F: Fn(&Value) -> ProbeWireResult<Value> + Send + Sync + 'static,
    {
        Self { source: name.to_string(), kind: ExprKind::Native(Arc::new(f)) }
    }

    /// Source text, or the callback name
    #[must_use] pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against `record`
    pub fn evaluate(&self, record: &Value) -> ProbeWireResult<Value> {
        match &self.kind {
            ExprKind::Ast(node) => node.eval(record),
            ExprKind::Native(f) => f(record),
        }
    }

    /// Evaluate and require a number
    pub fn evaluate_f64(&self, record: &Value) -> ProbeWireResult<f64> {
        let value = self.evaluate(record)?;
        value.as_f64().ok_or_else(|| {
            ProbeWireError::evaluation(format!("'{}' evaluated to {value}, not a number", self.source))
        })
    }

    /// Evaluate and apply truthiness
    pub fn evaluate_bool(&self, record: &Value) -> ProbeWireResult<bool> {
        self.evaluate(record).map(|v| truthy(&v))
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ExprKind::Ast(_) => write!(f, "Expr({:?})", self.source),
            ExprKind::Native(_) => write!(f, "Expr(fn {})", self.source),
        }
    }
}

impl FromStr for Expr {
    type Err = ProbeWireError;

    fn from_str(s: &str) -> ProbeWireResult<Self> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for Expr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Self::parse(&source).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone)]
enum Node {
    Literal(Value),
    Record,
    Field(String),
    Member(Box<Node>, String),
    Index(Box<Node>, Box<Node>),
    Array(Vec<Node>),
    Object(Vec<(String, Node)>),
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
}

impl Node {
    fn eval(&self, record: &Value) -> ProbeWireResult<Value> {
        match self {
            Node::Literal(value) => Ok(value.clone()),
            Node::Record => Ok(record.clone()),
            Node::Field(name) => Ok(record.get(name).cloned().unwrap_or(Value::Null)),
            Node::Member(target, name) => member(&target.eval(record)?, name),
            Node::Index(target, index) => subscript(&target.eval(record)?, &index.eval(record)?),
            Node::Array(items) => items
                .iter()
                .map(|item| item.eval(record))
                .collect::<ProbeWireResult<Vec<_>>>()
                .map(Value::Array),
            Node::Object(fields) => {
                let mut map = Map::new();
                for (key, node) in fields {
                    map.insert(key.clone(), node.eval(record)?);
                }
                Ok(Value::Object(map))
            }
            Node::Unary(UnaryOp::Not, operand) => Ok(Value::Bool(!truthy(&operand.eval(record)?))),
            Node::Unary(UnaryOp::Neg, operand) => {
                let value = operand.eval(record)?;
                let n = value
                    .as_f64()
                    .ok_or_else(|| ProbeWireError::evaluation(format!("cannot negate {value}")))?;
                Ok(number_value(-n))
            }
            Node::Binary(BinaryOp::And, lhs, rhs) => {
                let left = lhs.eval(record)?;
                if truthy(&left) {
                    rhs.eval(record)
                } else {
                    Ok(left)
                }
            }
            Node::Binary(BinaryOp::Or, lhs, rhs) => {
                let left = lhs.eval(record)?;
                if truthy(&left) {
                    Ok(left)
                } else {
                    rhs.eval(record)
                }
            }
            Node::Binary(op, lhs, rhs) => binary(*op, &lhs.eval(record)?, &rhs.eval(record)?),
        }
    }
}

fn member(target: &Value, name: &str) -> ProbeWireResult<Value> {
    match target {
        Value::Null => Err(ProbeWireError::evaluation(format!("cannot read '{name}' of null"))),
        Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
        Value::Array(items) if name == "length" => Ok(Value::from(items.len())),
        Value::String(s) if name == "length" => Ok(Value::from(s.chars().count())),
        _ => Ok(Value::Null),
    }
}

fn subscript(target: &Value, index: &Value) -> ProbeWireResult<Value> {
    match (target, index) {
        (Value::Null, _) => Err(ProbeWireError::evaluation(format!("cannot index null with {index}"))),
        (_, Value::String(name)) => member(target, name),
        (Value::Array(items), Value::Number(n)) => Ok(position(n)
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Null)),
        (Value::String(s), Value::Number(n)) => Ok(position(n)
            .and_then(|i| s.chars().nth(i))
            .map_or(Value::Null, |c| Value::String(c.to_string()))),
        _ => Ok(Value::Null),
    }
}

fn position(n: &serde_json::Number) -> Option<usize> {
    n.as_u64()
        .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
        .and_then(|i| usize::try_from(i).ok())
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> ProbeWireResult<Value> {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(loose_eq(left, right))),
        BinaryOp::Ne => return Ok(Value::Bool(!loose_eq(left, right))),
        BinaryOp::Add if left.is_string() || right.is_string() => {
            return Ok(Value::String(format!("{}{}", display(left), display(right))));
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            if let (Value::String(a), Value::String(b)) = (left, right) {
                let ordering = a.cmp(b);
                return Ok(Value::Bool(match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::Le => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                }));
            }
        }
        _ => {}
    }

    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(ProbeWireError::evaluation(format!(
            "operator {op:?} needs numbers, got {left} and {right}"
        )));
    };
    Ok(match op {
        BinaryOp::Add => number_value(a + b),
        BinaryOp::Sub => number_value(a - b),
        BinaryOp::Mul => number_value(a * b),
        BinaryOp::Div => number_value(a / b),
        BinaryOp::Rem => number_value(a % b),
        BinaryOp::Lt => Value::Bool(a < b),
        BinaryOp::Le => Value::Bool(a <= b),
        BinaryOp::Gt => Value::Bool(a > b),
        BinaryOp::Ge => Value::Bool(a >= b),
        BinaryOp::Eq | BinaryOp::Ne | BinaryOp::And | BinaryOp::Or => Value::Null,
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

const PUNCTUATION: [&str; 25] = [
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "(", ")", "[", "]", "{", "}", ",", ":", ".", "!", "-",
    "+", "*", "/", "%", "<", ">",
];

fn tokenize(source: &str) -> ProbeWireResult<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                i += 1;
                if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
                    i += 1;
                }
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let n = text
                .parse::<f64>()
                .map_err(|_| ProbeWireError::config(format!("Invalid number '{text}' in '{source}'")))?;
            tokens.push(Token::Number(n));
        } else if c == '"' || c == '\'' {
            let (text, next) = string_literal(&chars, i, source)?;
            tokens.push(Token::Str(text));
            i = next;
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
            let punct = PUNCTUATION
                .iter()
                .find(|p| rest.starts_with(**p))
                .ok_or_else(|| ProbeWireError::config(format!("Unexpected '{c}' in '{source}'")))?;
            tokens.push(Token::Punct(match *punct {
                "===" => "==",
                "!==" => "!=",
                other => other,
            }));
            i += punct.chars().count();
        }
    }
    Ok(tokens)
}

fn string_literal(chars: &[char], start: usize, source: &str) -> ProbeWireResult<(String, usize)> {
    let quote = chars[start];
    let mut text = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            c if c == quote => return Ok((text, i + 1)),
            '\\' if i + 1 < chars.len() => {
                text.push(match chars[i + 1] {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
                i += 2;
            }
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    Err(ProbeWireError::config(format!("Unterminated string in '{source}'")))
}

/// Deepest nesting of unary operators, groups, subscripts and literals
const MAX_DEPTH: usize = 64;

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    source: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(p)) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> ProbeWireResult<()> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn unexpected(&self) -> ProbeWireError {
        match self.peek() {
            Some(token) => ProbeWireError::config(format!("Unexpected {token:?} in '{}'", self.source)),
            None => ProbeWireError::config(format!("Unexpected end of expression '{}'", self.source)),
        }
    }

    fn expression(&mut self) -> ProbeWireResult<Node> {
        self.or()
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> ProbeWireResult<Node>,
    ) -> ProbeWireResult<Node> {
        let mut node = next(self)?;
        'outer: loop {
            for (punct, op) in ops {
                if self.eat(punct) {
                    let rhs = next(self)?;
                    node = Node::Binary(*op, Box::new(node), Box::new(rhs));
                    continue 'outer;
                }
            }
            return Ok(node);
        }
    }

    fn or(&mut self) -> ProbeWireResult<Node> {
        self.binary_level(&[("||", BinaryOp::Or)], Self::and)
    }

    fn and(&mut self) -> ProbeWireResult<Node> {
        self.binary_level(&[("&&", BinaryOp::And)], Self::equality)
    }

    fn equality(&mut self) -> ProbeWireResult<Node> {
        self.binary_level(&[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)], Self::comparison)
    }

    fn comparison(&mut self) -> ProbeWireResult<Node> {
        self.binary_level(
            &[("<=", BinaryOp::Le), (">=", BinaryOp::Ge), ("<", BinaryOp::Lt), (">", BinaryOp::Gt)],
            Self::additive,
        )
    }

    fn additive(&mut self) -> ProbeWireResult<Node> {
        self.binary_level(&[("+", BinaryOp::Add), ("-", BinaryOp::Sub)], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> ProbeWireResult<Node> {
        self.binary_level(
            &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
            Self::unary,
        )
    }

    fn unary(&mut self) -> ProbeWireResult<Node> {
        if self.depth >= MAX_DEPTH {
            return Err(ProbeWireError::config(format!(
                "Expression nests deeper than {MAX_DEPTH} levels"
            )));
        }
        self.depth += 1;
        let node = self.nested_unary();
        self.depth -= 1;
        node
    }

    fn nested_unary(&mut self) -> ProbeWireResult<Node> {
        if self.eat("-") {
            return Ok(Node::Unary(UnaryOp::Neg, Box::new(self.unary()?)));
        }
        if self.eat("!") {
            return Ok(Node::Unary(UnaryOp::Not, Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> ProbeWireResult<Node> {
        let mut node = self.primary()?;
        loop {
            if self.eat(".") {
                match self.tokens.get(self.pos).cloned() {
                    Some(Token::Ident(name)) => {
                        self.pos += 1;
                        node = Node::Member(Box::new(node), name);
                    }
                    _ => return Err(self.unexpected()),
                }
            } else if self.eat("[") {
                let index = self.expression()?;
                self.expect("]")?;
                node = Node::Index(Box::new(node), Box::new(index));
            } else {
                return Ok(node);
            }
        }
    }

    fn primary(&mut self) -> ProbeWireResult<Node> {
        let Some(token) = self.tokens.get(self.pos).cloned() else {
            return Err(self.unexpected());
        };
        self.pos += 1;
        match token {
            Token::Number(n) => Ok(Node::Literal(number_value(n))),
            Token::Str(s) => Ok(Node::Literal(Value::String(s))),
            Token::Ident(name) => Ok(match name.as_str() {
                "true" => Node::Literal(Value::Bool(true)),
                "false" => Node::Literal(Value::Bool(false)),
                "null" | "undefined" => Node::Literal(Value::Null),
                "_" => Node::Record,
                _ => Node::Field(name),
            }),
            Token::Punct("(") => {
                let node = self.expression()?;
                self.expect(")")?;
                Ok(node)
            }
            Token::Punct("[") => {
                let mut items = Vec::new();
                if !self.eat("]") {
                    loop {
                        items.push(self.expression()?);
                        if self.eat("]") {
                            break;
                        }
                        self.expect(",")?;
                    }
                }
                Ok(Node::Array(items))
            }
            Token::Punct("{") => {
                let mut fields = Vec::new();
                if !self.eat("}") {
                    loop {
                        let key = match self.tokens.get(self.pos).cloned() {
                            Some(Token::Ident(key) | Token::Str(key)) => key,
                            _ => return Err(self.unexpected()),
                        };
                        self.pos += 1;
                        self.expect(":")?;
                        fields.push((key, self.expression()?));
                        if self.eat("}") {
                            break;
                        }
                        self.expect(",")?;
                    }
                }
                Ok(Node::Object(fields))
            }
            _ => {
                self.pos -= 1;
                Err(self.unexpected())
            }
        }
    }
}
