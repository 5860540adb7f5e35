//! Execution lifecycle events.
//!
//! Events are projections for consumers driving per-node UI state -- they
//! are not the source of truth. The persisted snapshot is.

use opsflow_core::NodeId;
use opsflow_execution::{ExecutionSnapshot, NodeResult, RunStatus};
use serde::{Deserialize, Serialize};

/// Why a node was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No incoming edge was active (condition branch not taken, loop exit
    /// not reached).
    InactiveEdge,
    /// An upstream node failed under `stop` or `skip-branch` policy.
    UpstreamFailure,
    /// The run was cancelled before the node could execute.
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InactiveEdge => write!(f, "inactive_edge"),
            Self::UpstreamFailure => write!(f, "upstream_failure"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// An outbound event on a run's stream.
///
/// Events are totally ordered per run; `node_complete` for a node always
/// precedes any `progress` event counting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// Aggregate progress, emitted at band boundaries.
    Progress {
        /// Successfully completed nodes.
        completed: usize,
        /// Failed nodes.
        failed: usize,
        /// Skipped nodes.
        skipped: usize,
        /// Total nodes.
        total: usize,
        /// Terminal nodes as a percentage of the total.
        percentage: f64,
        /// Index of the band now executing.
        current_level: usize,
        /// Total number of bands.
        total_levels: usize,
    },
    /// A node was dispatched.
    NodeStart {
        /// The node.
        node_id: NodeId,
    },
    /// A node reached a terminal result (success or final failure).
    NodeComplete {
        /// The node.
        node_id: NodeId,
        /// Its final result.
        result: NodeResult,
    },
    /// An attempt failed.
    NodeError {
        /// The node.
        node_id: NodeId,
        /// The attempt's error message.
        error: String,
        /// 1-based attempt number.
        attempt: u32,
        /// Whether another attempt follows.
        will_retry: bool,
    },
    /// A retry is about to start.
    NodeRetry {
        /// The node.
        node_id: NodeId,
        /// 1-based number of the attempt about to run.
        attempt: u32,
    },
    /// A node was skipped without executing.
    NodeSkipped {
        /// The node.
        node_id: NodeId,
        /// Why.
        reason: SkipReason,
    },
    /// The run-level state machine transitioned.
    RunStateChanged {
        /// Previous status.
        from: RunStatus,
        /// New status.
        to: RunStatus,
    },
    /// The run reached a terminal status; carries the final snapshot
    /// (statuses, results, variables).
    Complete {
        /// The final run snapshot.
        summary: Box<ExecutionSnapshot>,
    },
    /// A fatal run-level error (compile failure, run timeout).
    Error {
        /// Human-readable message.
        message: String,
    },
}

impl ExecutionEvent {
    /// Whether this event may be dropped under backpressure.
    ///
    /// Only `progress` events are droppable; consumers re-sync from a
    /// synthetic `progress` after the band.
    #[must_use]
    pub fn is_droppable(&self) -> bool {
        matches!(self, Self::Progress { .. })
    }
}
