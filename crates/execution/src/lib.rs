#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Opsflow Execution
//!
//! Runtime execution state for the Opsflow workflow engine.
//!
//! This crate models execution-time concepts — it does NOT contain the
//! scheduler. It defines:
//!
//! - [`RunStatus`] and [`NodeStatus`] — the run- and node-level state
//!   machines, with transitions validated by the [`transition`] module
//! - [`NodeResult`] — the outcome of one node execution
//! - [`ExecutionSnapshot`] — the persistable view of a run
//! - [`ExecutionContext`] — per-run mutable state owned by the scheduler
//!   (scopes, completion-ordered results, loop frames, cancellation)

pub mod context;
pub mod error;
pub mod result;
pub mod state;
pub mod status;
pub mod transition;

pub use context::{ExecutionContext, LoopFrame};
pub use error::ExecutionError;
pub use result::NodeResult;
pub use state::{ExecutionSnapshot, Progress};
pub use status::{NodeStatus, RunStatus};
