//! The persistable view of a run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use opsflow_core::{ExecutionId, NodeId, WorkflowId};
use serde::{Deserialize, Serialize};

use crate::error::ExecutionError;
use crate::result::NodeResult;
use crate::status::{NodeStatus, RunStatus};
use crate::transition::{validate_node_transition, validate_run_transition};

/// Aggregate progress counters across a run's nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Nodes that completed successfully.
    pub completed: usize,
    /// Nodes that failed.
    pub failed: usize,
    /// Nodes that were skipped.
    pub skipped: usize,
    /// Total nodes in the run.
    pub total: usize,
    /// Terminal nodes as a percentage of the total.
    pub percentage: f64,
}

impl Progress {
    /// Build progress counters; percentage = terminal / total.
    #[must_use]
    pub fn new(completed: usize, failed: usize, skipped: usize, total: usize) -> Self {
        let done = completed + failed + skipped;
        let percentage = if total == 0 {
            100.0
        } else {
            (done as f64 / total as f64) * 100.0
        };
        Self {
            completed,
            failed,
            skipped,
            total,
            percentage,
        }
    }

    /// Count of nodes in any terminal status.
    #[must_use]
    pub fn done(&self) -> usize {
        self.completed + self.failed + self.skipped
    }
}

/// The complete observable state of a run.
///
/// The scheduler updates its run's snapshot as nodes finish; the registry
/// serializes the final snapshot to the document store on a terminal
/// transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    /// Unique run identifier.
    pub id: ExecutionId,
    /// The workflow being executed.
    pub workflow_id: WorkflowId,
    /// Current run status.
    pub status: RunStatus,
    /// When the run entered `running`.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal status.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Index of the band currently executing.
    pub current_level: usize,
    /// Total number of bands.
    pub total_levels: usize,
    /// Aggregate progress.
    pub progress: Progress,
    /// Per-node statuses.
    pub node_statuses: BTreeMap<NodeId, NodeStatus>,
    /// Per-node final results (overwritten on loop re-execution).
    pub node_results: BTreeMap<NodeId, NodeResult>,
    /// Run-level errors (compile failures, timeout, snapshot-persist
    /// warnings).
    #[serde(default)]
    pub errors: Vec<String>,
    /// Final workflow-scope variables.
    #[serde(default)]
    pub variables: serde_json::Map<String, serde_json::Value>,
}

impl ExecutionSnapshot {
    /// Create a snapshot in `idle` with all nodes `pending`.
    #[must_use]
    pub fn new(id: ExecutionId, workflow_id: WorkflowId, node_ids: &[NodeId]) -> Self {
        let node_statuses: BTreeMap<NodeId, NodeStatus> = node_ids
            .iter()
            .map(|n| (n.clone(), NodeStatus::Pending))
            .collect();
        let total = node_statuses.len();
        Self {
            id,
            workflow_id,
            status: RunStatus::Idle,
            started_at: None,
            completed_at: None,
            current_level: 0,
            total_levels: 0,
            progress: Progress::new(0, 0, 0, total),
            node_statuses,
            node_results: BTreeMap::new(),
            errors: Vec::new(),
            variables: serde_json::Map::new(),
        }
    }

    /// Transition the run status, validating the edge and stamping
    /// timestamps.
    pub fn transition(&mut self, to: RunStatus) -> Result<(), ExecutionError> {
        validate_run_transition(self.status, to)?;
        self.status = to;
        if to == RunStatus::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if to.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Transition one node's status, validating the edge.
    pub fn transition_node(
        &mut self,
        node_id: &NodeId,
        to: NodeStatus,
    ) -> Result<(), ExecutionError> {
        let current = self
            .node_statuses
            .get(node_id)
            .copied()
            .ok_or_else(|| ExecutionError::NodeNotFound(node_id.clone()))?;
        validate_node_transition(current, to)?;
        self.node_statuses.insert(node_id.clone(), to);
        self.refresh_progress();
        Ok(())
    }

    /// Force a node back to `pending` (loop bodies between iterations).
    pub fn reset_node(&mut self, node_id: &NodeId) {
        self.node_statuses
            .insert(node_id.clone(), NodeStatus::Pending);
        self.refresh_progress();
    }

    /// Record a node's final result.
    pub fn record_result(&mut self, result: NodeResult) {
        self.node_results.insert(result.node_id.clone(), result);
    }

    /// Recompute the aggregate counters from the per-node statuses.
    pub fn refresh_progress(&mut self) {
        let mut completed = 0;
        let mut failed = 0;
        let mut skipped = 0;
        for status in self.node_statuses.values() {
            match status {
                NodeStatus::Completed => completed += 1,
                NodeStatus::Failed => failed += 1,
                NodeStatus::Skipped => skipped += 1,
                _ => {}
            }
        }
        self.progress = Progress::new(completed, failed, skipped, self.node_statuses.len());
    }

    /// Returns `true` if every node is in a terminal status.
    #[must_use]
    pub fn all_nodes_terminal(&self) -> bool {
        self.node_statuses.values().all(NodeStatus::is_terminal)
    }
}
