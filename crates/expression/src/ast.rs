//! Expression AST.
//!
//! The parser produces this restricted tree and nothing else: paths rooted
//! in a closed set of scopes, filter pipelines, comparisons, logical
//! operators, and literals. Function calls, assignment, and arbitrary
//! identifier application are rejected at parse time.

use serde_json::Value;

/// The root scope a path resolves against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Root {
    /// `$prev` — prior node results in completion order. How the first
    /// segment (if any) is interpreted is an evaluation-time decision: a
    /// completed node id selects that node's output, an integer selects by
    /// completion-order offset, anything else is a field access on the most
    /// recent output.
    Prev,
    /// `$vars` — the mutable workflow scope.
    Vars,
    /// `$env` — the read-only global environment.
    Env,
    /// `$creds` — resolved credentials by id.
    Creds,
    /// `$loop` — the current loop frame, or `null` outside a loop.
    Loop,
    /// `$input` — shorthand for `$vars.input`.
    Input,
    /// A bare identifier: workflow scope first, then the environment.
    Ident(String),
}

/// One path segment after the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object key or node-id segment (`.hosts`, `.ping-1` is not valid — node
    /// ids with non-identifier characters need `$prev` index form).
    Key(String),
    /// Numeric array index (`.0`, `.12`).
    Index(u64),
}

/// Binary operators. Comparisons produce booleans; `&&`/`||` short-circuit
/// on truthiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `>=`
    Ge,
    /// `&&`
    And,
    /// `||`
    Or,
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal value (number, string, boolean, or null).
    Literal(Value),
    /// A path from a root through zero or more segments.
    Path {
        /// The root scope.
        root: Root,
        /// Dot-separated segments after the root.
        segments: Vec<Segment>,
    },
    /// A filter application: `input | name(args…)`.
    Pipe {
        /// The value being piped in.
        input: Box<Expr>,
        /// Filter name; unknown names pass the value through unchanged.
        filter: String,
        /// Literal arguments.
        args: Vec<Value>,
    },
    /// Logical negation on truthiness.
    Not(Box<Expr>),
    /// A binary operation.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
}

impl Expr {
    /// Convenience constructor for a rootless literal.
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }
}
