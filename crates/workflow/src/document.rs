//! The persisted workflow document model.
//!
//! Documents round-trip through the document store as opaque JSON; only the
//! compiler interprets them.

use opsflow_core::{BlockType, Handle, NodeId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A persisted workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDocument {
    /// Unique workflow identifier.
    pub id: WorkflowId,
    /// Display name.
    pub name: String,
    /// Monotonic document version.
    #[serde(default)]
    pub version: u32,
    /// The nodes of the graph.
    #[serde(default)]
    pub nodes: Vec<NodeDocument>,
    /// Handle-to-handle edges between nodes.
    #[serde(default)]
    pub edges: Vec<EdgeDocument>,
    /// Run settings.
    #[serde(default)]
    pub settings: WorkflowSettings,
    /// Initial workflow-scope variables.
    #[serde(default)]
    pub variables: Map<String, Value>,
}

/// One node of a workflow document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDocument {
    /// Author-chosen id, unique within the workflow.
    pub id: NodeId,
    /// Block type in `<category>.<name>` form.
    #[serde(rename = "type")]
    pub block_type: BlockType,
    /// Parameter mapping; string values may embed `{{ … }}` templates.
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Display label (UI only).
    #[serde(default)]
    pub label: String,
}

/// A directed edge between two node handles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDocument {
    /// Edge id, unique within the workflow.
    pub id: String,
    /// Source node.
    pub source: NodeId,
    /// Output handle on the source block.
    pub source_handle: Handle,
    /// Target node.
    pub target: NodeId,
    /// Input handle on the target block.
    pub target_handle: Handle,
}

/// What the scheduler does when a node fails (after retries).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorHandling {
    /// First failure fails the run; everything pending is skipped.
    Stop,
    /// Record the failure and keep going; downstream still activates.
    Continue,
    /// Skip everything transitively downstream of the failed node.
    SkipBranch,
}

impl Default for ErrorHandling {
    fn default() -> Self {
        Self::Stop
    }
}

impl std::fmt::Display for ErrorHandling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::Continue => write!(f, "continue"),
            Self::SkipBranch => write!(f, "skip-branch"),
        }
    }
}

/// Run settings carried by the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Failure policy.
    #[serde(default)]
    pub error_handling: ErrorHandling,
    /// Retry attempts per non-control node after the first failure.
    #[serde(default)]
    pub retry_count: u32,
    /// Delay between retries, in milliseconds.
    #[serde(default)]
    pub retry_delay_ms: u64,
    /// Run-wide timeout in seconds; also the default per-node timeout.
    /// 0 means none.
    #[serde(default)]
    pub timeout_s: u64,
    /// Maximum concurrently dispatched nodes (≥ 1).
    #[serde(default = "default_parallel_limit")]
    pub parallel_limit: usize,
}

fn default_parallel_limit() -> usize {
    4
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            error_handling: ErrorHandling::default(),
            retry_count: 0,
            retry_delay_ms: 0,
            timeout_s: 0,
            parallel_limit: default_parallel_limit(),
        }
    }
}

impl WorkflowDocument {
    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&NodeDocument> {
        self.nodes.iter().find(|n| &n.id == id)
    }
}
