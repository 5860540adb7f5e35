//! Expression error types.

use thiserror::Error;

use crate::template::Position;

/// Result alias for expression operations.
pub type ExpressionResult<T> = Result<T, ExpressionError>;

/// Errors from parsing templates and expressions.
///
/// Evaluation itself is total, so every error here is a *syntax* error,
/// surfaced when a template is parsed (normally at workflow compile time).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    /// A `{{` without a matching `}}`.
    #[error("unclosed '{{{{' at {position}")]
    UnclosedExpression {
        /// Where the opening `{{` starts.
        position: Position,
    },

    /// The expression inside `{{ … }}` failed to parse.
    #[error("syntax error at {position}: {message}")]
    Syntax {
        /// Human-readable description of what went wrong.
        message: String,
        /// Where in the template the offending token starts.
        position: Position,
    },

    /// The expression nests deeper than the evaluator supports.
    #[error("expression too deeply nested (max {max})")]
    TooDeep {
        /// The nesting limit that was exceeded.
        max: usize,
    },
}

impl ExpressionError {
    /// Create a syntax error at the given position.
    pub fn syntax(message: impl Into<String>, position: Position) -> Self {
        Self::Syntax {
            message: message.into(),
            position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_display_includes_position() {
        let err = ExpressionError::syntax("unexpected token ')'", Position::new(2, 7, 15));
        assert_eq!(
            err.to_string(),
            "syntax error at line 2, column 7: unexpected token ')'"
        );
    }

    #[test]
    fn unclosed_display() {
        let err = ExpressionError::UnclosedExpression {
            position: Position::start(),
        };
        assert!(err.to_string().contains("unclosed"));
        assert!(err.to_string().contains("line 1"));
    }
}
