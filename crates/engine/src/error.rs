//! Engine error types.

use opsflow_core::{ExecutionId, NodeId, WorkflowId};

/// Errors from the engine layer.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The workflow document could not be loaded.
    #[error("document store: {0}")]
    DocumentStore(String),

    /// The workflow failed to compile.
    #[error("compile failed for workflow {workflow_id}: {message}")]
    CompileFailed {
        /// The workflow that failed to compile.
        workflow_id: WorkflowId,
        /// Joined compile error messages.
        message: String,
    },

    /// No handler is registered for a block type.
    #[error("unknown block type: {0}")]
    UnknownBlockType(String),

    /// A credential id could not be resolved.
    #[error("credential resolution failed for '{credential_id}': {message}")]
    CredentialResolution {
        /// The credential id that failed.
        credential_id: String,
        /// Resolver error message.
        message: String,
    },

    /// A referenced execution does not exist (or has been pruned).
    #[error("execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    /// A node failed during execution.
    #[error("node {node_id} failed: {error}")]
    NodeFailed {
        /// The node that failed.
        node_id: NodeId,
        /// The error message.
        error: String,
    },

    /// The execution was cancelled.
    #[error("execution cancelled")]
    Cancelled,

    /// Error from the execution-state layer.
    #[error("execution error: {0}")]
    Execution(#[from] opsflow_execution::ExecutionError),
}
