//! Evaluation context for expression execution.
//!
//! A context is an immutable snapshot of the scopes an expression can see:
//! the workflow variable scope (`$vars`), the environment (`$env`),
//! credentials (`$creds`), the current loop frame (`$loop`), and prior node
//! outputs in completion order (`$prev`). The scheduler builds one per
//! parameter resolution; evaluation never mutates it.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Snapshot of the scopes visible to an expression.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    vars: Map<String, Value>,
    env: Map<String, Value>,
    creds: Map<String, Value>,
    loop_frame: Option<Value>,
    /// Outputs of completed nodes, oldest first.
    completed: Vec<(String, Value)>,
    by_node: HashMap<String, usize>,
}

impl EvaluationContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder.
    #[must_use]
    pub fn builder() -> EvaluationContextBuilder {
        EvaluationContextBuilder::default()
    }

    /// The workflow variable scope (`$vars`).
    #[must_use]
    pub fn vars(&self) -> &Map<String, Value> {
        &self.vars
    }

    /// The environment scope (`$env`).
    #[must_use]
    pub fn env(&self) -> &Map<String, Value> {
        &self.env
    }

    /// The credentials scope (`$creds`), keyed by credential id.
    #[must_use]
    pub fn creds(&self) -> &Map<String, Value> {
        &self.creds
    }

    /// The current loop frame (`$loop`), if inside a loop body.
    #[must_use]
    pub fn loop_frame(&self) -> Option<&Value> {
        self.loop_frame.as_ref()
    }

    /// The most recently completed node's output (bare `$prev`).
    #[must_use]
    pub fn prev_latest(&self) -> Option<&Value> {
        self.completed.last().map(|(_, v)| v)
    }

    /// The output `offset` positions back in completion order.
    ///
    /// `offset` 1 is the most recent completion (`$prev.1` ≡ bare `$prev`);
    /// offset 0 is treated the same as 1.
    #[must_use]
    pub fn prev_by_offset(&self, offset: u64) -> Option<&Value> {
        let back = (offset.max(1) as usize).checked_sub(1)?;
        let idx = self.completed.len().checked_sub(back + 1)?;
        self.completed.get(idx).map(|(_, v)| v)
    }

    /// A specific completed node's output (`$prev.<nodeId>`).
    #[must_use]
    pub fn prev_by_node(&self, node_id: &str) -> Option<&Value> {
        self.by_node
            .get(node_id)
            .and_then(|&i| self.completed.get(i))
            .map(|(_, v)| v)
    }

    /// Record a completed node's output.
    ///
    /// Re-recording an id (loop re-execution) replaces the previous entry
    /// and moves the node to the most-recent position.
    pub fn push_completed(&mut self, node_id: impl Into<String>, output: Value) {
        let node_id = node_id.into();
        if let Some(&idx) = self.by_node.get(&node_id) {
            self.completed.remove(idx);
            for i in self.by_node.values_mut() {
                if *i > idx {
                    *i -= 1;
                }
            }
        }
        self.by_node.insert(node_id.clone(), self.completed.len());
        self.completed.push((node_id, output));
    }

    /// Set a workflow variable.
    pub fn set_var(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// Set or clear the loop frame.
    pub fn set_loop_frame(&mut self, frame: Option<Value>) {
        self.loop_frame = frame;
    }
}

/// Builder for [`EvaluationContext`].
#[derive(Debug, Clone, Default)]
pub struct EvaluationContextBuilder {
    ctx: EvaluationContext,
}

impl EvaluationContextBuilder {
    /// Set the workflow variable scope.
    #[must_use]
    pub fn vars(mut self, vars: Map<String, Value>) -> Self {
        self.ctx.vars = vars;
        self
    }

    /// Set the environment scope.
    #[must_use]
    pub fn env(mut self, env: Map<String, Value>) -> Self {
        self.ctx.env = env;
        self
    }

    /// Set the credentials scope.
    #[must_use]
    pub fn creds(mut self, creds: Map<String, Value>) -> Self {
        self.ctx.creds = creds;
        self
    }

    /// Set the loop frame.
    #[must_use]
    pub fn loop_frame(mut self, frame: Value) -> Self {
        self.ctx.loop_frame = Some(frame);
        self
    }

    /// Append a completed node output (completion order follows call order).
    #[must_use]
    pub fn completed(mut self, node_id: impl Into<String>, output: Value) -> Self {
        self.ctx.push_completed(node_id, output);
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> EvaluationContext {
        self.ctx
    }
}
