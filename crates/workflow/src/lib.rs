#![forbid(unsafe_code)]

//! # Opsflow Workflow
//!
//! The workflow document model and the compiler that turns a visual graph
//! into an executable DAG.
//!
//! A persisted workflow is a set of typed nodes joined by handle-to-handle
//! edges plus run settings and initial variables. The compiler validates the
//! document (unique ids, declared handles, template syntax), desugars
//! `control.loop` back-edges into nested mini-DAGs, rejects every other
//! cycle, and computes the level-banded execution order the scheduler runs.
//!
//! Compilation is deterministic: the same document always produces an
//! identical [`CompiledDag`], including ordering inside level bands (node id
//! ascending).

pub mod compile;
pub mod descriptor;
pub mod document;
pub mod error;
pub mod graph;

pub use compile::{CompileResult, CompiledDag, CompiledNode, compile};
pub use descriptor::{BlockCatalog, BlockDescriptor, HandleSpec, control_descriptor};
pub use document::{
    EdgeDocument, ErrorHandling, NodeDocument, WorkflowDocument, WorkflowSettings,
};
pub use error::{CompileError, CompileWarning};
pub use graph::DependencyGraph;
