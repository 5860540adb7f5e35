//! Node execution results.

use chrono::{DateTime, Utc};
use opsflow_core::{Handle, NodeId};
use serde::{Deserialize, Serialize};

/// The outcome of one node execution (final attempt).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    /// The node this result belongs to.
    pub node_id: NodeId,
    /// Whether the node completed successfully.
    pub success: bool,
    /// Output value defined by the block type's output schema.
    pub output: serde_json::Value,
    /// Error message when `success` is false.
    #[serde(default)]
    pub error: Option<String>,
    /// When the (final) attempt started.
    pub started_at: DateTime<Utc>,
    /// When the node finished.
    pub completed_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// For control-flow blocks: which outgoing handle is active
    /// (`condition` → `"true"`/`"false"`, `loop` → `"complete"`).
    #[serde(default)]
    pub next_handle: Option<Handle>,
}

impl NodeResult {
    /// A successful result, stamping `completed_at` and the duration now.
    #[must_use]
    pub fn success(node_id: NodeId, output: serde_json::Value, started_at: DateTime<Utc>) -> Self {
        let completed_at = Utc::now();
        Self {
            node_id,
            success: true,
            output,
            error: None,
            started_at,
            completed_at,
            duration_ms: duration_ms(started_at, completed_at),
            next_handle: None,
        }
    }

    /// A failed result.
    #[must_use]
    pub fn failure(
        node_id: NodeId,
        error: impl Into<String>,
        output: serde_json::Value,
        started_at: DateTime<Utc>,
    ) -> Self {
        let completed_at = Utc::now();
        Self {
            node_id,
            success: false,
            output,
            error: Some(error.into()),
            started_at,
            completed_at,
            duration_ms: duration_ms(started_at, completed_at),
            next_handle: None,
        }
    }

    /// A result for a node that was cancelled before or during dispatch.
    /// The scheduler records the node as skipped.
    #[must_use]
    pub fn cancelled(node_id: NodeId, started_at: DateTime<Utc>) -> Self {
        Self::failure(node_id, "cancelled", serde_json::Value::Null, started_at)
    }

    /// Attach the active outgoing handle (control-flow blocks).
    #[must_use]
    pub fn with_next_handle(mut self, handle: impl Into<Handle>) -> Self {
        self.next_handle = Some(handle.into());
        self
    }

    /// Returns `true` if this result names `handle` as active, or names no
    /// handle at all (non-control blocks activate every output).
    #[must_use]
    pub fn activates(&self, handle: &str) -> bool {
        match &self.next_handle {
            None => true,
            Some(h) => h == handle,
        }
    }
}

fn duration_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn nid(s: &str) -> NodeId {
        NodeId::new(s).unwrap()
    }

    #[test]
    fn success_result() {
        let result = NodeResult::success(nid("ping"), json!({"latency": 12}), Utc::now());
        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.output, json!({"latency": 12}));
        assert!(result.completed_at >= result.started_at);
    }

    #[test]
    fn failure_result() {
        let result = NodeResult::failure(nid("ssh"), "connection refused", json!(null), Utc::now());
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn cancelled_result() {
        let result = NodeResult::cancelled(nid("delay"), Utc::now());
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("cancelled"));
        assert_eq!(result.output, json!(null));
    }

    #[test]
    fn next_handle_gates_activation() {
        let plain = NodeResult::success(nid("ping"), json!(true), Utc::now());
        assert!(plain.activates("out"));
        assert!(plain.activates("anything"));

        let branched = NodeResult::success(nid("cond"), json!(true), Utc::now())
            .with_next_handle("true");
        assert!(branched.activates("true"));
        assert!(!branched.activates("false"));
    }

    #[test]
    fn serde_roundtrip() {
        let result = NodeResult::success(nid("cond"), json!(false), Utc::now())
            .with_next_handle("false");
        let json = serde_json::to_string(&result).unwrap();
        let back: NodeResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.node_id, result.node_id);
        assert_eq!(back.next_handle.as_deref(), Some("false"));
        assert!(back.success);
    }

    #[test]
    fn duration_is_non_negative() {
        let start = Utc::now();
        let result = NodeResult::success(nid("n"), json!(null), start);
        assert!(result.duration_ms < 10_000);
    }
}
