//! State machine transition validation for run and node statuses.

use crate::error::ExecutionError;
use crate::status::{NodeStatus, RunStatus};

/// Returns `true` if the run-level transition from `from` to `to` is valid.
#[must_use]
pub fn can_transition_run(from: RunStatus, to: RunStatus) -> bool {
    matches!(
        (from, to),
        (RunStatus::Idle, RunStatus::Compiling)
            | (RunStatus::Compiling, RunStatus::Validating)
            | (RunStatus::Compiling, RunStatus::Failed)
            | (RunStatus::Validating, RunStatus::Running)
            | (RunStatus::Validating, RunStatus::Failed)
            | (RunStatus::Running, RunStatus::Completed)
            | (RunStatus::Running, RunStatus::Failed)
            | (RunStatus::Running, RunStatus::Paused)
            | (RunStatus::Running, RunStatus::Cancelled)
            | (RunStatus::Paused, RunStatus::Running)
            | (RunStatus::Paused, RunStatus::Cancelled)
            | (RunStatus::Completed, RunStatus::Idle)
            | (RunStatus::Failed, RunStatus::Idle)
            | (RunStatus::Cancelled, RunStatus::Idle)
    )
}

/// Validate a run-level transition, returning an error if invalid.
pub fn validate_run_transition(from: RunStatus, to: RunStatus) -> Result<(), ExecutionError> {
    if can_transition_run(from, to) {
        Ok(())
    } else {
        Err(ExecutionError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Returns `true` if the node-level transition from `from` to `to` is valid.
#[must_use]
pub fn can_transition_node(from: NodeStatus, to: NodeStatus) -> bool {
    matches!(
        (from, to),
        (NodeStatus::Pending, NodeStatus::Waiting)
            | (NodeStatus::Pending, NodeStatus::Skipped)
            | (NodeStatus::Waiting, NodeStatus::Running)
            | (NodeStatus::Waiting, NodeStatus::Skipped)
            | (NodeStatus::Running, NodeStatus::Completed)
            | (NodeStatus::Running, NodeStatus::Failed)
            | (NodeStatus::Running, NodeStatus::Skipped)
    )
}

/// Validate a node-level transition, returning an error if invalid.
pub fn validate_node_transition(from: NodeStatus, to: NodeStatus) -> Result<(), ExecutionError> {
    if can_transition_node(from, to) {
        Ok(())
    } else {
        Err(ExecutionError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
