//! Execution error types.

use opsflow_core::NodeId;
use thiserror::Error;

/// Errors from the execution-state layer.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A state transition is not valid for the current status.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Attempted target status.
        to: String,
    },

    /// A referenced node does not exist in the run.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// A serialization or deserialization error.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The run was cancelled.
    #[error("execution cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_display() {
        let err = ExecutionError::InvalidTransition {
            from: "running".into(),
            to: "idle".into(),
        };
        assert_eq!(err.to_string(), "invalid transition from running to idle");
    }

    #[test]
    fn node_not_found_display() {
        let err = ExecutionError::NodeNotFound(NodeId::new("ghost").unwrap());
        assert_eq!(err.to_string(), "node not found: ghost");
    }

    #[test]
    fn from_serde_error() {
        let serde_err = serde_json::from_str::<String>("not json").unwrap_err();
        let err = ExecutionError::from(serde_err);
        assert!(err.to_string().starts_with("serialization:"));
    }
}
