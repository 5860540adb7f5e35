#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Opsflow Core
//!
//! Core identifier types for the Opsflow workflow engine. Every other crate
//! in the workspace builds on these:
//!
//! - [`ExecutionId`] / [`WorkflowId`] — generated UUID identifiers
//! - [`NodeId`] — author-chosen node identifier, unique within one workflow
//! - [`BlockType`] — a `<category>.<name>` block type string
//! - [`Handle`] — a named input/output port on a block

pub mod block;
pub mod id;
pub mod node;

pub use block::{BlockType, BlockTypeError};
pub use id::{ExecutionId, WorkflowId};
pub use node::{NodeId, NodeIdError};

/// A named input or output port on a block.
///
/// Handles are plain strings declared by the block type (`"out"`, `"true"`,
/// `"iteration"`, …); edges connect a source handle to a target handle.
pub type Handle = String;
