//! Recursive-descent parser for the expression language.
//!
//! Grammar, loosest-binding first:
//!
//! ```text
//! expr    := or
//! or      := and ( '||' and )*
//! and     := cmp ( '&&' cmp )*
//! cmp     := pipe ( ('=='|'!='|'<='|'>='|'<'|'>') pipe )?
//! pipe    := unary ( '|' IDENT ( '(' literals ')' )? )*
//! unary   := '!' unary | primary
//! primary := literal | path | '(' expr ')'
//! path    := ('$' ROOT | IDENT) ( '.' (IDENT | INT) )*
//! ```
//!
//! Filter arguments must be literals; anything resembling a function call,
//! assignment, or an unknown `$root` is a syntax error.

use serde_json::Value;

use crate::ast::{BinaryOp, Expr, Root, Segment};
use crate::error::{ExpressionError, ExpressionResult};
use crate::template::Position;

/// Maximum parenthesis/negation nesting depth.
const MAX_DEPTH: usize = 64;

/// Parse a single expression (the text between `{{` and `}}`).
///
/// `base` is the template position of the expression's first character, used
/// to report error positions in template coordinates.
pub fn parse_expression(source: &str, base: Position) -> ExpressionResult<Expr> {
    let tokens = tokenize(source, base)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        base,
        source_len: source.chars().count(),
    };
    let expr = parser.parse_or(0)?;
    if let Some(tok) = parser.peek() {
        return Err(ExpressionError::syntax(
            format!("unexpected token '{}'", tok.text),
            tok.position,
        ));
    }
    Ok(expr)
}

// ── Tokens ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Dollar(String),
    Number(Value),
    Str(String),
    Op(&'static str),
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    text: String,
    position: Position,
}

/// Map a (line, column) inside the expression source onto template
/// coordinates.
fn project(base: Position, line: usize, column: usize, offset: usize) -> Position {
    if line == 1 {
        Position::new(base.line, base.column + column - 1, base.offset + offset)
    } else {
        Position::new(base.line + line - 1, column, base.offset + offset)
    }
}

fn tokenize(source: &str, base: Position) -> ExpressionResult<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line = 1;
    let mut column = 1;

    macro_rules! here {
        () => {
            project(base, line, column, i)
        };
    }

    while i < len {
        let c = chars[i];

        if c.is_whitespace() {
            if c == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
            i += 1;
            continue;
        }

        let start = here!();

        // Two-character operators first.
        if i + 1 < len {
            let pair: String = chars[i..i + 2].iter().collect();
            let op = match pair.as_str() {
                "==" => Some("=="),
                "!=" => Some("!="),
                "<=" => Some("<="),
                ">=" => Some(">="),
                "&&" => Some("&&"),
                "||" => Some("||"),
                _ => None,
            };
            if let Some(op) = op {
                tokens.push(Token {
                    kind: TokenKind::Op(op),
                    text: op.to_string(),
                    position: start,
                });
                i += 2;
                column += 2;
                continue;
            }
        }

        match c {
            '<' | '>' | '!' | '|' | '(' | ')' | ',' | '.' | '-' => {
                let op: &'static str = match c {
                    '<' => "<",
                    '>' => ">",
                    '!' => "!",
                    '|' => "|",
                    '(' => "(",
                    ')' => ")",
                    ',' => ",",
                    '.' => ".",
                    _ => "-",
                };
                tokens.push(Token {
                    kind: TokenKind::Op(op),
                    text: op.to_string(),
                    position: start,
                });
                i += 1;
                column += 1;
            }

            '$' => {
                let mut j = i + 1;
                while j < len && (chars[j].is_ascii_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                if j == i + 1 {
                    return Err(ExpressionError::syntax("expected root name after '$'", start));
                }
                let name: String = chars[i + 1..j].iter().collect();
                let consumed = j - i;
                tokens.push(Token {
                    kind: TokenKind::Dollar(name.clone()),
                    text: format!("${name}"),
                    position: start,
                });
                i = j;
                column += consumed;
            }

            '"' | '\'' => {
                let quote = c;
                let mut value = String::new();
                let mut j = i + 1;
                let mut closed = false;
                while j < len {
                    let ch = chars[j];
                    if ch == '\\' && j + 1 < len {
                        let escaped = chars[j + 1];
                        value.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                        j += 2;
                        continue;
                    }
                    if ch == quote {
                        closed = true;
                        break;
                    }
                    value.push(ch);
                    j += 1;
                }
                if !closed {
                    return Err(ExpressionError::syntax("unterminated string literal", start));
                }
                let consumed = j + 1 - i;
                tokens.push(Token {
                    kind: TokenKind::Str(value.clone()),
                    text: format!("{quote}{value}{quote}"),
                    position: start,
                });
                i = j + 1;
                column += consumed;
            }

            _ if c.is_ascii_digit() => {
                let mut j = i;
                while j < len && chars[j].is_ascii_digit() {
                    j += 1;
                }
                let mut is_float = false;
                // Only consume the dot when a digit follows; `0.name` is a
                // path segment boundary, not a float.
                if j + 1 < len && chars[j] == '.' && chars[j + 1].is_ascii_digit() {
                    is_float = true;
                    j += 1;
                    while j < len && chars[j].is_ascii_digit() {
                        j += 1;
                    }
                }
                let text: String = chars[i..j].iter().collect();
                let value = if is_float {
                    text.parse::<f64>()
                        .ok()
                        .and_then(|f| serde_json::Number::from_f64(f).map(Value::Number))
                        .ok_or_else(|| {
                            ExpressionError::syntax(format!("invalid number '{text}'"), start)
                        })?
                } else {
                    text.parse::<i64>()
                        .map(|n| Value::Number(n.into()))
                        .map_err(|_| {
                            ExpressionError::syntax(format!("invalid number '{text}'"), start)
                        })?
                };
                let consumed = j - i;
                tokens.push(Token {
                    kind: TokenKind::Number(value),
                    text,
                    position: start,
                });
                i = j;
                column += consumed;
            }

            _ if c.is_ascii_alphabetic() || c == '_' => {
                let mut j = i;
                while j < len && (chars[j].is_ascii_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                let text: String = chars[i..j].iter().collect();
                let consumed = j - i;
                tokens.push(Token {
                    kind: TokenKind::Ident(text.clone()),
                    text,
                    position: start,
                });
                i = j;
                column += consumed;
            }

            other => {
                return Err(ExpressionError::syntax(
                    format!("unexpected character '{other}'"),
                    start,
                ));
            }
        }
    }

    Ok(tokens)
}

// ── Parser ──────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    base: Position,
    source_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat_op(&mut self, op: &str) -> bool {
        let matched = matches!(self.peek(), Some(t) if matches!(t.kind, TokenKind::Op(o) if o == op));
        if matched {
            self.pos += 1;
        }
        matched
    }

    fn end_position(&self) -> Position {
        project(self.base, 1, self.source_len + 1, self.source_len)
    }

    fn check_depth(&self, depth: usize) -> ExpressionResult<()> {
        if depth > MAX_DEPTH {
            Err(ExpressionError::TooDeep { max: MAX_DEPTH })
        } else {
            Ok(())
        }
    }

    fn parse_or(&mut self, depth: usize) -> ExpressionResult<Expr> {
        self.check_depth(depth)?;
        let mut left = self.parse_and(depth)?;
        while self.eat_op("||") {
            let right = self.parse_and(depth)?;
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self, depth: usize) -> ExpressionResult<Expr> {
        let mut left = self.parse_comparison(depth)?;
        while self.eat_op("&&") {
            let right = self.parse_comparison(depth)?;
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self, depth: usize) -> ExpressionResult<Expr> {
        let left = self.parse_pipe(depth)?;
        let op = match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Op("==")) => Some(BinaryOp::Eq),
            Some(TokenKind::Op("!=")) => Some(BinaryOp::Ne),
            Some(TokenKind::Op("<=")) => Some(BinaryOp::Le),
            Some(TokenKind::Op(">=")) => Some(BinaryOp::Ge),
            Some(TokenKind::Op("<")) => Some(BinaryOp::Lt),
            Some(TokenKind::Op(">")) => Some(BinaryOp::Gt),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let right = self.parse_pipe(depth)?;
            return Ok(Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    fn parse_pipe(&mut self, depth: usize) -> ExpressionResult<Expr> {
        let mut input = self.parse_unary(depth)?;
        while self.eat_op("|") {
            let Some(tok) = self.advance() else {
                return Err(ExpressionError::syntax(
                    "expected filter name after '|'",
                    self.end_position(),
                ));
            };
            let TokenKind::Ident(name) = tok.kind else {
                return Err(ExpressionError::syntax(
                    format!("expected filter name after '|', found '{}'", tok.text),
                    tok.position,
                ));
            };
            let args = if self.eat_op("(") {
                self.parse_filter_args()?
            } else {
                Vec::new()
            };
            input = Expr::Pipe {
                input: Box::new(input),
                filter: name,
                args,
            };
        }
        Ok(input)
    }

    /// Parse filter arguments: a comma-separated list of literals, then `)`.
    fn parse_filter_args(&mut self) -> ExpressionResult<Vec<Value>> {
        let mut args = Vec::new();
        if self.eat_op(")") {
            return Ok(args);
        }
        loop {
            args.push(self.parse_literal_arg()?);
            if self.eat_op(",") {
                continue;
            }
            if self.eat_op(")") {
                return Ok(args);
            }
            let pos = self.peek().map_or_else(|| self.end_position(), |t| t.position);
            return Err(ExpressionError::syntax(
                "expected ',' or ')' in filter arguments",
                pos,
            ));
        }
    }

    fn parse_literal_arg(&mut self) -> ExpressionResult<Value> {
        let negate = self.eat_op("-");
        let Some(tok) = self.advance() else {
            return Err(ExpressionError::syntax(
                "expected filter argument",
                self.end_position(),
            ));
        };
        let value = match tok.kind {
            TokenKind::Number(v) => v,
            TokenKind::Str(s) if !negate => Value::String(s),
            TokenKind::Ident(ref kw) if !negate => match kw.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                "null" => Value::Null,
                _ => {
                    return Err(ExpressionError::syntax(
                        format!("filter arguments must be literals, found '{}'", tok.text),
                        tok.position,
                    ));
                }
            },
            _ => {
                return Err(ExpressionError::syntax(
                    format!("filter arguments must be literals, found '{}'", tok.text),
                    tok.position,
                ));
            }
        };
        if negate {
            return negate_number(&value).ok_or_else(|| {
                ExpressionError::syntax("'-' must be followed by a number", tok.position)
            });
        }
        Ok(value)
    }

    fn parse_unary(&mut self, depth: usize) -> ExpressionResult<Expr> {
        self.check_depth(depth)?;
        if self.eat_op("!") {
            let inner = self.parse_unary(depth + 1)?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary(depth)
    }

    fn parse_primary(&mut self, depth: usize) -> ExpressionResult<Expr> {
        if self.eat_op("(") {
            let inner = self.parse_or(depth + 1)?;
            if !self.eat_op(")") {
                let pos = self.peek().map_or_else(|| self.end_position(), |t| t.position);
                return Err(ExpressionError::syntax("expected ')'", pos));
            }
            return Ok(inner);
        }

        if self.eat_op("-") {
            let Some(tok) = self.advance() else {
                return Err(ExpressionError::syntax(
                    "expected number after '-'",
                    self.end_position(),
                ));
            };
            if let TokenKind::Number(ref v) = tok.kind {
                if let Some(negated) = negate_number(v) {
                    return Ok(Expr::Literal(negated));
                }
            }
            return Err(ExpressionError::syntax(
                "'-' must be followed by a number",
                tok.position,
            ));
        }

        let Some(tok) = self.advance() else {
            return Err(ExpressionError::syntax(
                "unexpected end of expression",
                self.end_position(),
            ));
        };

        match tok.kind {
            TokenKind::Number(v) => Ok(Expr::Literal(v)),
            TokenKind::Str(s) => Ok(Expr::Literal(Value::String(s))),

            TokenKind::Dollar(ref name) => {
                let root = match name.as_str() {
                    "prev" => Root::Prev,
                    "vars" => Root::Vars,
                    "env" => Root::Env,
                    "creds" => Root::Creds,
                    "loop" => Root::Loop,
                    "input" => Root::Input,
                    other => {
                        return Err(ExpressionError::syntax(
                            format!("unknown root '${other}'"),
                            tok.position,
                        ));
                    }
                };
                let segments = self.parse_segments()?;
                Ok(Expr::Path { root, segments })
            }

            TokenKind::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ => {
                    // A bare identifier path. Reject call syntax outright.
                    if matches!(self.peek(), Some(t) if t.kind == TokenKind::Op("(")) {
                        return Err(ExpressionError::syntax(
                            format!("function calls are not supported: '{name}(…)'"),
                            tok.position,
                        ));
                    }
                    let segments = self.parse_segments()?;
                    Ok(Expr::Path {
                        root: Root::Ident(name),
                        segments,
                    })
                }
            },

            TokenKind::Op(op) => Err(ExpressionError::syntax(
                format!("unexpected token '{op}'"),
                tok.position,
            )),
        }
    }

    fn parse_segments(&mut self) -> ExpressionResult<Vec<Segment>> {
        let mut segments = Vec::new();
        while self.eat_op(".") {
            let Some(tok) = self.advance() else {
                return Err(ExpressionError::syntax(
                    "expected path segment after '.'",
                    self.end_position(),
                ));
            };
            match tok.kind {
                TokenKind::Ident(name) => segments.push(Segment::Key(name)),
                TokenKind::Number(Value::Number(ref n)) if n.is_u64() => {
                    segments.push(Segment::Index(n.as_u64().unwrap_or(0)));
                }
                _ => {
                    return Err(ExpressionError::syntax(
                        format!("invalid path segment '{}'", tok.text),
                        tok.position,
                    ));
                }
            }
        }
        Ok(segments)
    }
}

fn negate_number(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Value::Number((-i).into()))
            } else {
                n.as_f64()
                    .and_then(|f| serde_json::Number::from_f64(-f).map(Value::Number))
            }
        }
        _ => None,
    }
}
