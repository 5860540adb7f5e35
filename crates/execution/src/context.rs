//! Runtime execution context (non-serializable).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use opsflow_core::{ExecutionId, NodeId, WorkflowId};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::result::NodeResult;

/// Per-iteration loop variables, exposed to expressions as `$loop.*`.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopFrame {
    /// Zero-based iteration index.
    pub index: usize,
    /// One-based iteration number.
    pub iteration: usize,
    /// Whether this is the first iteration.
    pub first: bool,
    /// Whether this is the last iteration.
    pub last: bool,
    /// The current item.
    pub item: Value,
    /// The full array being iterated.
    pub array: Vec<Value>,
}

impl LoopFrame {
    /// Build the frame for iteration `index` of `array`.
    #[must_use]
    pub fn new(index: usize, array: Vec<Value>) -> Self {
        let len = array.len();
        Self {
            index,
            iteration: index + 1,
            first: index == 0,
            last: index + 1 == len,
            item: array.get(index).cloned().unwrap_or(Value::Null),
            array,
        }
    }

    /// The frame as a JSON object for expression evaluation.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "index": self.index,
            "iteration": self.iteration,
            "first": self.first,
            "last": self.last,
            "item": self.item,
            "array": self.array,
        })
    }
}

/// Per-run mutable state, exclusively owned by the scheduler.
///
/// This type is NOT serializable — it holds runtime resources (cancellation
/// token, pause flag). The persistable view is
/// [`ExecutionSnapshot`](crate::state::ExecutionSnapshot).
///
/// Workers never see the context; they receive a read-only
/// [`EvaluationContext`](opsflow_expression::EvaluationContext) snapshot
/// built by [`ExecutionContext::evaluation_context`].
#[derive(Debug)]
pub struct ExecutionContext {
    /// Unique identifier for this run.
    pub execution_id: ExecutionId,
    /// The workflow being executed.
    pub workflow_id: WorkflowId,
    env: Map<String, Value>,
    credentials: Map<String, Value>,
    workflow_scope: Map<String, Value>,
    /// Completion order of node ids; most recent last.
    completed: Vec<NodeId>,
    results: HashMap<NodeId, NodeResult>,
    /// Innermost frame last; nested loops push and pop.
    loop_stack: Vec<LoopFrame>,
    cancellation: CancellationToken,
    paused: Arc<AtomicBool>,
}

impl ExecutionContext {
    /// Create a fresh context.
    #[must_use]
    pub fn new(execution_id: ExecutionId, workflow_id: WorkflowId) -> Self {
        Self {
            execution_id,
            workflow_id,
            env: Map::new(),
            credentials: Map::new(),
            workflow_scope: Map::new(),
            completed: Vec::new(),
            results: HashMap::new(),
            loop_stack: Vec::new(),
            cancellation: CancellationToken::new(),
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set the read-only environment scope.
    #[must_use]
    pub fn with_env(mut self, env: Map<String, Value>) -> Self {
        self.env = env;
        self
    }

    /// Set the resolved credentials scope (keyed by credential id).
    #[must_use]
    pub fn with_credentials(mut self, credentials: Map<String, Value>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Seed the workflow scope (document variables plus caller overrides).
    #[must_use]
    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.workflow_scope = variables;
        self
    }

    /// Replace the cancellation token (to chain into a parent token).
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    // ── scopes ──────────────────────────────────────────────────────

    /// Set a workflow-scope variable.
    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.workflow_scope.insert(name.into(), value);
    }

    /// Get a workflow-scope variable.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.workflow_scope.get(name)
    }

    /// The full workflow scope.
    #[must_use]
    pub fn variables(&self) -> &Map<String, Value> {
        &self.workflow_scope
    }

    // ── results ─────────────────────────────────────────────────────

    /// Record a node's final result. Re-recording (loop re-execution)
    /// replaces the previous result and moves the node to the most-recent
    /// completion position.
    pub fn record_result(&mut self, result: NodeResult) {
        let node_id = result.node_id.clone();
        if self.results.insert(node_id.clone(), result).is_some() {
            self.completed.retain(|id| id != &node_id);
        }
        self.completed.push(node_id);
    }

    /// A node's recorded result.
    #[must_use]
    pub fn result(&self, node_id: &NodeId) -> Option<&NodeResult> {
        self.results.get(node_id)
    }

    /// Drop recorded results for the given nodes (loop bodies are cleared
    /// before each iteration).
    pub fn clear_results<'a>(&mut self, node_ids: impl IntoIterator<Item = &'a NodeId>) {
        for node_id in node_ids {
            if self.results.remove(node_id).is_some() {
                self.completed.retain(|id| id != node_id);
            }
        }
    }

    // ── loop frames ─────────────────────────────────────────────────

    /// Enter a loop iteration.
    pub fn push_loop_frame(&mut self, frame: LoopFrame) {
        self.loop_stack.push(frame);
    }

    /// Leave the innermost loop iteration, restoring any outer frame.
    pub fn pop_loop_frame(&mut self) -> Option<LoopFrame> {
        self.loop_stack.pop()
    }

    /// The innermost loop frame, if inside a loop body.
    #[must_use]
    pub fn loop_frame(&self) -> Option<&LoopFrame> {
        self.loop_stack.last()
    }

    // ── cancellation and pause ──────────────────────────────────────

    /// The run's cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// The shared pause flag.
    #[must_use]
    pub fn pause_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.paused)
    }

    /// Set or clear the pause flag.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Whether the run is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    // ── expression snapshot ─────────────────────────────────────────

    /// Build a read-only expression context from the current state.
    ///
    /// Completion order is preserved for `$prev` index resolution; only
    /// successful and failed outputs are visible (skipped nodes record no
    /// result).
    #[must_use]
    pub fn evaluation_context(&self) -> opsflow_expression::EvaluationContext {
        let mut builder = opsflow_expression::EvaluationContext::builder()
            .vars(self.workflow_scope.clone())
            .env(self.env.clone())
            .creds(self.credentials.clone());
        if let Some(frame) = self.loop_frame() {
            builder = builder.loop_frame(frame.to_value());
        }
        for node_id in &self.completed {
            if let Some(result) = self.results.get(node_id) {
                builder = builder.completed(node_id.as_str(), result.output.clone());
            }
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn nid(s: &str) -> NodeId {
        NodeId::new(s).unwrap()
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(ExecutionId::v4(), WorkflowId::v4())
    }

    #[test]
    fn new_context_is_empty() {
        let ctx = ctx();
        assert!(ctx.variables().is_empty());
        assert!(ctx.loop_frame().is_none());
        assert!(!ctx.is_cancelled());
        assert!(!ctx.is_paused());
    }

    #[test]
    fn variables_roundtrip() {
        let mut ctx = ctx();
        ctx.set_variable("x", json!("lo"));
        assert_eq!(ctx.variable("x"), Some(&json!("lo")));
        assert!(ctx.variable("missing").is_none());
    }

    #[test]
    fn record_and_lookup_results() {
        let mut ctx = ctx();
        ctx.record_result(NodeResult::success(nid("a"), json!(1), Utc::now()));
        assert!(ctx.result(&nid("a")).is_some());
        assert!(ctx.result(&nid("b")).is_none());
    }

    #[test]
    fn re_recording_moves_completion_position() {
        let mut ctx = ctx();
        ctx.record_result(NodeResult::success(nid("a"), json!(1), Utc::now()));
        ctx.record_result(NodeResult::success(nid("b"), json!(2), Utc::now()));
        ctx.record_result(NodeResult::success(nid("a"), json!(3), Utc::now()));

        let eval = ctx.evaluation_context();
        assert_eq!(eval.prev_latest(), Some(&json!(3)));
        assert_eq!(eval.prev_by_offset(2), Some(&json!(2)));
    }

    #[test]
    fn clear_results_removes_from_order() {
        let mut ctx = ctx();
        ctx.record_result(NodeResult::success(nid("a"), json!(1), Utc::now()));
        ctx.record_result(NodeResult::success(nid("b"), json!(2), Utc::now()));
        ctx.clear_results([&nid("b")]);

        assert!(ctx.result(&nid("b")).is_none());
        let eval = ctx.evaluation_context();
        assert_eq!(eval.prev_latest(), Some(&json!(1)));
    }

    #[test]
    fn loop_frames_nest() {
        let mut ctx = ctx();
        ctx.push_loop_frame(LoopFrame::new(0, vec![json!("x"), json!("y")]));
        ctx.push_loop_frame(LoopFrame::new(1, vec![json!(1), json!(2)]));

        assert_eq!(ctx.loop_frame().unwrap().item, json!(2));
        ctx.pop_loop_frame();
        assert_eq!(ctx.loop_frame().unwrap().item, json!("x"));
        ctx.pop_loop_frame();
        assert!(ctx.loop_frame().is_none());
    }

    #[test]
    fn loop_frame_values() {
        let frame = LoopFrame::new(1, vec![json!("a"), json!("b"), json!("c")]);
        assert_eq!(frame.iteration, 2);
        assert!(!frame.first);
        assert!(!frame.last);
        assert_eq!(frame.item, json!("b"));

        let last = LoopFrame::new(2, vec![json!("a"), json!("b"), json!("c")]);
        assert!(last.last);

        let value = frame.to_value();
        assert_eq!(value["index"], json!(1));
        assert_eq!(value["array"], json!(["a", "b", "c"]));
    }

    #[test]
    fn cancellation_flag() {
        let ctx = ctx();
        assert!(!ctx.is_cancelled());
        ctx.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn pause_flag_is_shared() {
        let ctx = ctx();
        let flag = ctx.pause_flag();
        ctx.set_paused(true);
        assert!(flag.load(Ordering::SeqCst));
        assert!(ctx.is_paused());
        ctx.set_paused(false);
        assert!(!ctx.is_paused());
    }

    #[test]
    fn evaluation_context_sees_scopes() {
        let mut env = Map::new();
        env.insert("site".into(), json!("fra1"));
        let mut ctx = ExecutionContext::new(ExecutionId::v4(), WorkflowId::v4()).with_env(env);
        ctx.set_variable("host", json!("10.0.0.1"));
        ctx.push_loop_frame(LoopFrame::new(0, vec![json!("only")]));
        ctx.record_result(NodeResult::success(nid("ping"), json!({"up": true}), Utc::now()));

        let eval = ctx.evaluation_context();
        assert_eq!(eval.vars().get("host"), Some(&json!("10.0.0.1")));
        assert_eq!(eval.env().get("site"), Some(&json!("fra1")));
        assert_eq!(eval.loop_frame().unwrap()["item"], json!("only"));
        assert_eq!(eval.prev_by_node("ping"), Some(&json!({"up": true})));
    }
}
