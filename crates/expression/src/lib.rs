#![forbid(unsafe_code)]

//! # Opsflow Expression
//!
//! The template and expression language used in node parameters. Parameter
//! strings may embed `{{ … }}` expressions that resolve paths against the
//! execution scopes and pipe the result through filters:
//!
//! ```text
//! {{ $vars.hosts | first | trim }}
//! {{ $prev.scan.open_ports | length }}
//! {{ $loop.index }} of {{ $loop.array | length }}
//! ```
//!
//! The surface is deliberately small: paths, a closed set of pure filters,
//! comparison and logical operators, and literals. There are no function
//! calls, no assignment, and no user-defined code.
//!
//! Evaluation never fails at runtime. A missing path segment yields `null`
//! and a filter applied to the wrong type passes its input through. Only a
//! syntactically unparseable template is an error, and the workflow compiler
//! rejects those before execution via [`ExpressionEngine::check`].

pub mod ast;
pub mod context;
pub mod error;
pub mod eval;
pub mod filters;
pub mod parser;
pub mod template;
pub mod value_utils;

mod engine;

pub use context::{EvaluationContext, EvaluationContextBuilder};
pub use engine::ExpressionEngine;
pub use error::{ExpressionError, ExpressionResult};
pub use template::{Position, Template, TemplatePart};
