//! Run- and node-level status tracking.

use serde::{Deserialize, Serialize};

/// The overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created but not yet started.
    Idle,
    /// The document is being compiled into a DAG.
    Compiling,
    /// The compiled DAG is being validated.
    Validating,
    /// Actively running nodes.
    Running,
    /// Temporarily paused; resumable.
    Paused,
    /// All nodes reached a terminal status and the run succeeded.
    Completed,
    /// The run failed (compile error, fatal node failure, or timeout).
    Failed,
    /// Cancelled on user request.
    Cancelled,
}

impl RunStatus {
    /// Returns `true` if the run has reached a final state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns `true` if the run is doing work (or could resume it).
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Compiling | Self::Validating | Self::Running | Self::Paused
        )
    }

    /// Returns `true` if the run completed successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Compiling => write!(f, "compiling"),
            Self::Validating => write!(f, "validating"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The status of a single node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Not yet scheduled.
    Pending,
    /// Its band has begun; waiting for a worker slot.
    Waiting,
    /// Dispatched to a worker.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with a failure (after retries).
    Failed,
    /// Never ran — inactive branch, upstream failure, or cancellation.
    Skipped,
}

impl NodeStatus {
    /// Returns `true` if the node has reached a final state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Waiting => write!(f, "waiting"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}
