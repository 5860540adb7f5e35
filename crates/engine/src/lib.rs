#![forbid(unsafe_code)]

//! # Opsflow Engine
//!
//! The workflow execution engine: looks up block handlers, resolves node
//! parameters through the expression language, and drives compiled DAGs
//! level by level with bounded parallelism, control-flow semantics,
//! retries, and error-handling policies.
//!
//! Entry point for embedders is the [`ExecutionRegistry`]: register block
//! handlers, point it at a document store and credential resolver, then
//! `start` workflows and `subscribe` to their event streams.

pub mod adapters;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod handler;
pub mod registry;
pub mod runs;
pub mod scheduler;

pub use adapters::{
    Credential, CredentialResolver, DocumentStore, MemoryDocumentStore, StaticCredentialResolver,
};
pub use dispatcher::Dispatcher;
pub use error::EngineError;
pub use events::RunEvents;
pub use handler::{BlockHandler, BlockOutcome, HandlerError, ParameterKind, ParameterSpec};
pub use registry::HandlerRegistry;
pub use runs::{ExecutionRegistry, RegistryConfig, StartOptions};
pub use scheduler::{DagOutcome, Scheduler};
