//! Template parsing.
//!
//! A template is a string mixing static text with `{{ … }}` expressions.
//! Parsing splits it into parts and records line/column positions so syntax
//! errors point at the offending expression.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ast::Expr;
use crate::error::{ExpressionError, ExpressionResult};
use crate::parser;

/// Maximum number of expressions allowed in a single template.
const MAX_TEMPLATE_EXPRESSIONS: usize = 1000;

/// Position in the template (1-based line and column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Line number (1-based).
    pub line: usize,
    /// Column number (1-based).
    pub column: usize,
    /// Absolute character offset (0-based).
    pub offset: usize,
}

impl Position {
    /// Create a new position.
    #[must_use]
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }

    /// Position at the start of input.
    #[must_use]
    pub fn start() -> Self {
        Self {
            line: 1,
            column: 1,
            offset: 0,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// A template part: static text or a parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    /// Static text, emitted verbatim.
    Static {
        /// The text content.
        content: Arc<str>,
        /// Starting position in the template.
        position: Position,
    },
    /// A `{{ … }}` expression.
    Expression {
        /// The parsed expression.
        expr: Expr,
        /// The raw source between the braces.
        source: Arc<str>,
        /// Starting position of the `{{` in the template.
        position: Position,
    },
}

/// A parsed template.
#[derive(Debug, Clone)]
pub struct Template {
    source: Arc<str>,
    parts: Vec<TemplatePart>,
}

impl Template {
    /// Parse a template string, parsing each embedded expression eagerly.
    pub fn parse(source: impl Into<String>) -> ExpressionResult<Self> {
        let source_str = source.into();
        let parts = split_parts(&source_str)?;
        Ok(Self {
            source: Arc::from(source_str.as_str()),
            parts,
        })
    }

    /// The original source string.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The parsed parts.
    #[must_use]
    pub fn parts(&self) -> &[TemplatePart] {
        &self.parts
    }

    /// Returns `true` if the template contains at least one expression.
    #[must_use]
    pub fn has_expressions(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, TemplatePart::Expression { .. }))
    }

    /// Number of expressions in the template.
    #[must_use]
    pub fn expression_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p, TemplatePart::Expression { .. }))
            .count()
    }

    /// Returns the single expression if the template is exactly one
    /// `{{ … }}` surrounded by nothing but whitespace.
    ///
    /// Such templates evaluate to the expression's native value instead of a
    /// string.
    #[must_use]
    pub fn as_single_expression(&self) -> Option<&Expr> {
        let mut found: Option<&Expr> = None;
        for part in &self.parts {
            match part {
                TemplatePart::Static { content, .. } => {
                    if !content.trim().is_empty() {
                        return None;
                    }
                }
                TemplatePart::Expression { expr, .. } => {
                    if found.is_some() {
                        return None;
                    }
                    found = Some(expr);
                }
            }
        }
        found
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// Split a template into static and expression parts.
fn split_parts(source: &str) -> ExpressionResult<Vec<TemplatePart>> {
    let mut parts = Vec::new();
    let mut current_static = String::new();
    let mut static_start = Position::start();
    let mut expr_count = 0usize;

    let chars: Vec<char> = source.chars().collect();
    let len = chars.len();
    let mut i = 0;
    let mut line = 1;
    let mut column = 1;

    while i < len {
        if i + 1 < len && chars[i] == '{' && chars[i + 1] == '{' {
            if !current_static.is_empty() {
                parts.push(TemplatePart::Static {
                    content: Arc::from(current_static.as_str()),
                    position: static_start,
                });
                current_static.clear();
            }

            let expr_start = Position::new(line, column, i);

            // Find the closing }} while tracking line/column inside.
            let mut j = i + 2;
            let mut expr_line = line;
            let mut expr_column = column + 2;
            let mut closed = false;
            while j + 1 < len {
                if chars[j] == '}' && chars[j + 1] == '}' {
                    closed = true;
                    break;
                }
                if chars[j] == '\n' {
                    expr_line += 1;
                    expr_column = 1;
                } else {
                    expr_column += 1;
                }
                j += 1;
            }

            if !closed {
                return Err(ExpressionError::UnclosedExpression {
                    position: expr_start,
                });
            }

            let inner: String = chars[i + 2..j].iter().collect();
            let inner_position = Position::new(line, column + 2, i + 2);
            let expr = parser::parse_expression(inner.trim(), inner_position)?;

            expr_count += 1;
            if expr_count > MAX_TEMPLATE_EXPRESSIONS {
                return Err(ExpressionError::syntax(
                    format!("template contains too many expressions (max {MAX_TEMPLATE_EXPRESSIONS})"),
                    expr_start,
                ));
            }

            parts.push(TemplatePart::Expression {
                expr,
                source: Arc::from(inner.trim()),
                position: expr_start,
            });

            i = j + 2;
            line = expr_line;
            column = expr_column + 2;
            static_start = Position::new(line, column, i);
        } else {
            current_static.push(chars[i]);
            if chars[i] == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
            i += 1;
        }
    }

    if !current_static.is_empty() {
        parts.push(TemplatePart::Static {
            content: Arc::from(current_static.as_str()),
            position: static_start,
        });
    }

    Ok(parts)
}
