//! The scheduler.
//!
//! One scheduler per run drives the compiled DAG band by band. All context
//! mutation happens on the scheduler task (single writer); handler
//! invocations fan out through a `JoinSet` bounded by a semaphore of
//! `settings.parallel_limit`. Control-flow blocks execute inline on the
//! scheduler itself — they read and write the context, and loops recurse
//! into their body DAGs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use opsflow_core::NodeId;
use opsflow_eventbus::{ControlCommand, ControlReceiver, SkipReason};
use opsflow_execution::{
    ExecutionContext, ExecutionSnapshot, LoopFrame, NodeResult, NodeStatus, RunStatus,
};
use opsflow_expression::ExpressionEngine;
use opsflow_workflow::{CompiledDag, CompiledNode, ErrorHandling, WorkflowSettings};
use parking_lot::RwLock;
use serde_json::{Map, Value, json};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use crate::dispatcher::Dispatcher;
use crate::events::RunEvents;

/// How often the pause spin-wait re-checks flags and control commands.
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How a DAG traversal ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DagOutcome {
    /// Every band ran to the end.
    Completed,
    /// A node failed under `stop` policy.
    Failed,
    /// The cancellation token fired.
    Cancelled,
}

/// Drives one run's DAG to completion.
pub struct Scheduler {
    dispatcher: Arc<Dispatcher>,
    settings: WorkflowSettings,
    events: RunEvents,
    snapshot: Arc<RwLock<ExecutionSnapshot>>,
    engine: ExpressionEngine,
    semaphore: Arc<Semaphore>,
}

impl Scheduler {
    /// Create a scheduler for one run.
    #[must_use]
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        settings: WorkflowSettings,
        events: RunEvents,
        snapshot: Arc<RwLock<ExecutionSnapshot>>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(settings.parallel_limit.max(1)));
        Self {
            dispatcher,
            settings,
            events,
            snapshot,
            engine: ExpressionEngine::new(),
            semaphore,
        }
    }

    /// Run the outer DAG. The caller owns the surrounding run-state
    /// machine; this returns how the traversal ended.
    #[instrument(skip_all, fields(execution_id = %ctx.execution_id))]
    pub async fn run(
        &self,
        dag: &CompiledDag,
        ctx: &mut ExecutionContext,
        control: &mut ControlReceiver,
    ) -> DagOutcome {
        self.run_dag(dag, ctx, control, true).await
    }

    /// Transition the run status in the shared snapshot, emitting
    /// `run_state_changed`. Returns `false` (and leaves the status alone)
    /// when the edge is invalid.
    pub fn transition_run(&self, to: RunStatus) -> bool {
        let mut snapshot = self.snapshot.write();
        let from = snapshot.status;
        match snapshot.transition(to) {
            Ok(()) => {
                drop(snapshot);
                self.events.run_state_changed(from, to);
                true
            }
            Err(e) => {
                warn!(%from, %to, error = %e, "rejected run transition");
                false
            }
        }
    }

    // ── band loop ───────────────────────────────────────────────────

    async fn run_dag(
        &self,
        dag: &CompiledDag,
        ctx: &mut ExecutionContext,
        control: &mut ControlReceiver,
        outer: bool,
    ) -> DagOutcome {
        let total_levels = dag.execution_order.len();
        let mut any_failed = false;

        for (level, band) in dag.execution_order.iter().enumerate() {
            self.poll_control(ctx, control);
            if ctx.is_cancelled() {
                self.skip_remaining(dag);
                return DagOutcome::Cancelled;
            }
            if self.honor_pause(ctx, control).await == PauseOutcome::CancelledWhilePaused {
                self.skip_remaining(dag);
                return DagOutcome::Cancelled;
            }

            if outer {
                let progress = {
                    let mut snapshot = self.snapshot.write();
                    snapshot.current_level = level;
                    snapshot.total_levels = total_levels;
                    snapshot.progress
                };
                self.events.progress(progress, level, total_levels);
            }

            // Partition the band by the active-edge rule.
            let mut active: Vec<&CompiledNode> = Vec::new();
            for node_id in band {
                let Some(node) = dag.node(node_id) else {
                    continue;
                };
                if self.is_activated(node, ctx) {
                    active.push(node);
                } else {
                    let reason = if self.has_failed_dependency(node, ctx) {
                        SkipReason::UpstreamFailure
                    } else {
                        SkipReason::InactiveEdge
                    };
                    self.set_node_status(node_id, NodeStatus::Skipped);
                    self.events.node_skipped(node_id, reason);
                }
            }

            for node in &active {
                self.set_node_status(&node.id, NodeStatus::Waiting);
            }

            // Fan handler nodes out to workers; keep control nodes inline.
            let eval_ctx = ctx.evaluation_context();
            let mut join_set: JoinSet<NodeResult> = JoinSet::new();
            let mut band_results: Vec<NodeResult> = Vec::new();

            for node in &active {
                if node.block_type.is_control() {
                    continue;
                }
                self.set_node_status(&node.id, NodeStatus::Running);
                self.events.node_start(&node.id);

                let dispatcher = Arc::clone(&self.dispatcher);
                let worker_node = (*node).clone();
                let worker_ctx = eval_ctx.clone();
                let cancel = ctx.cancellation().clone();
                let settings = self.settings.clone();
                let events = self.events.clone();
                let semaphore = Arc::clone(&self.semaphore);
                join_set.spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return NodeResult::cancelled(worker_node.id.clone(), Utc::now());
                    };
                    dispatcher
                        .dispatch_with_retry(&worker_node, &worker_ctx, cancel, &settings, &events)
                        .await
                });
            }

            for node in &active {
                if !node.block_type.is_control() {
                    continue;
                }
                self.set_node_status(&node.id, NodeStatus::Running);
                self.events.node_start(&node.id);
                let result = self.execute_control(node, ctx, control).await;
                band_results.push(result);
            }

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(result) => band_results.push(result),
                    Err(join_err) => {
                        warn!(?join_err, "node worker panicked");
                    }
                }
            }

            // A panicked worker leaves its node stuck in running: fail it.
            for node_id in band {
                if self.node_status(node_id) == Some(NodeStatus::Running)
                    && !band_results.iter().any(|r| &r.node_id == node_id)
                {
                    band_results.push(NodeResult::failure(
                        node_id.clone(),
                        "worker panicked",
                        Value::Null,
                        Utc::now(),
                    ));
                }
            }

            for result in band_results {
                if !result.success {
                    if result.error.as_deref() == Some("cancelled") && ctx.is_cancelled() {
                        // In-flight at cancellation: skipped, not failed.
                        self.set_node_status(&result.node_id, NodeStatus::Skipped);
                        continue;
                    }
                    any_failed = true;
                }
                let status = if result.success {
                    NodeStatus::Completed
                } else {
                    NodeStatus::Failed
                };
                self.set_node_status(&result.node_id, status);
                self.snapshot.write().record_result(result.clone());
                self.events.node_complete(&result);
                ctx.record_result(result);
            }

            // Re-sync consumers if backpressure shed progress events.
            if outer && self.events.take_progress_dropped() {
                let progress = self.snapshot.read().progress;
                self.events.progress(progress, level, total_levels);
            }

            if any_failed && self.settings.error_handling == ErrorHandling::Stop {
                self.skip_remaining_with_reason(dag, SkipReason::UpstreamFailure);
                return DagOutcome::Failed;
            }
            if ctx.is_cancelled() {
                self.skip_remaining(dag);
                return DagOutcome::Cancelled;
            }
        }

        DagOutcome::Completed
    }

    // ── activation ──────────────────────────────────────────────────

    /// The active-edge rule: a node activates when at least one incoming
    /// edge is active. Under `continue` policy a failed source still
    /// activates its successors.
    fn is_activated(&self, node: &CompiledNode, ctx: &ExecutionContext) -> bool {
        if node.inputs.is_empty() {
            return true;
        }
        node.inputs.iter().any(|(source, handle)| {
            match ctx.result(source) {
                Some(result) if result.success => result.activates(handle),
                Some(_) => self.settings.error_handling == ErrorHandling::Continue,
                None => false,
            }
        })
    }

    fn has_failed_dependency(&self, node: &CompiledNode, ctx: &ExecutionContext) -> bool {
        node.dependencies
            .iter()
            .any(|dep| ctx.result(dep).is_some_and(|r| !r.success))
    }

    // ── pause, cancel, control ──────────────────────────────────────

    fn poll_control(&self, ctx: &ExecutionContext, control: &mut ControlReceiver) {
        while let Ok(command) = control.try_recv() {
            debug!(%command, "control command");
            match command {
                ControlCommand::Pause => ctx.set_paused(true),
                ControlCommand::Resume => ctx.set_paused(false),
                ControlCommand::Cancel => ctx.cancel(),
            }
        }
    }

    /// Spin-wait while paused, staying responsive to cancel. Always leaves
    /// the run back in `running` so the caller's terminal transition is
    /// valid from a single state.
    async fn honor_pause(
        &self,
        ctx: &ExecutionContext,
        control: &mut ControlReceiver,
    ) -> PauseOutcome {
        if !ctx.is_paused() {
            return PauseOutcome::NotPaused;
        }
        self.transition_run(RunStatus::Paused);
        let mut cancelled = false;
        while ctx.is_paused() {
            if ctx.is_cancelled() {
                cancelled = true;
                break;
            }
            tokio::select! {
                () = tokio::time::sleep(PAUSE_POLL_INTERVAL) => {}
                () = ctx.cancellation().cancelled() => {
                    cancelled = true;
                    break;
                }
            }
            self.poll_control(ctx, control);
        }
        self.transition_run(RunStatus::Running);
        if cancelled {
            PauseOutcome::CancelledWhilePaused
        } else {
            PauseOutcome::Resumed
        }
    }

    // ── status bookkeeping ──────────────────────────────────────────

    fn node_status(&self, node_id: &NodeId) -> Option<NodeStatus> {
        self.snapshot.read().node_statuses.get(node_id).copied()
    }

    fn set_node_status(&self, node_id: &NodeId, status: NodeStatus) {
        if let Err(e) = self.snapshot.write().transition_node(node_id, status) {
            warn!(%node_id, %status, error = %e, "rejected node transition");
        }
    }

    /// Mark every non-terminal node in the scope (and nested bodies)
    /// skipped without emitting node events — used on cancellation, where
    /// the final summary carries the statuses.
    fn skip_remaining(&self, dag: &CompiledDag) {
        let mut snapshot = self.snapshot.write();
        for node_id in dag.all_node_ids() {
            let status = snapshot.node_statuses.get(&node_id).copied();
            if matches!(status, Some(s) if !s.is_terminal() && s != NodeStatus::Running) {
                let _ = snapshot.transition_node(&node_id, NodeStatus::Skipped);
            }
        }
    }

    /// Mark every non-terminal node skipped and announce each — used when
    /// `stop` policy terminates the run.
    fn skip_remaining_with_reason(&self, dag: &CompiledDag, reason: SkipReason) {
        let mut skipped = Vec::new();
        {
            let mut snapshot = self.snapshot.write();
            for node_id in dag.all_node_ids() {
                let status = snapshot.node_statuses.get(&node_id).copied();
                if matches!(status, Some(s) if !s.is_terminal() && s != NodeStatus::Running) {
                    if snapshot.transition_node(&node_id, NodeStatus::Skipped).is_ok() {
                        skipped.push(node_id);
                    }
                }
            }
        }
        for node_id in skipped {
            self.events.node_skipped(&node_id, reason);
        }
    }

    // ── control-flow blocks ─────────────────────────────────────────

    /// Execute a `control.*` block inline. Never retried.
    async fn execute_control(
        &self,
        node: &CompiledNode,
        ctx: &mut ExecutionContext,
        control: &mut ControlReceiver,
    ) -> NodeResult {
        let started_at = Utc::now();
        match node.block_type.name() {
            "start" => self.execute_start(node, ctx, started_at),
            "end" => self.execute_end(node, ctx, started_at),
            "delay" => self.execute_delay(node, ctx, started_at).await,
            "condition" => self.execute_condition(node, ctx, started_at),
            "variable_set" => self.execute_variable_set(node, ctx, started_at),
            "variable_get" => self.execute_variable_get(node, ctx, started_at),
            "parallel" => self.execute_parallel(node, started_at),
            "loop" => self.execute_loop(node, ctx, control, started_at).await,
            other => NodeResult::failure(
                node.id.clone(),
                format!("unknown control block: {other}"),
                Value::Null,
                started_at,
            ),
        }
    }

    /// Seed the workflow scope from `config.inputs`. Always succeeds.
    fn execute_start(
        &self,
        node: &CompiledNode,
        ctx: &mut ExecutionContext,
        started_at: chrono::DateTime<Utc>,
    ) -> NodeResult {
        let mut seeded = Map::new();
        if let Some(Value::Object(inputs)) = node.config.get("inputs") {
            let eval_ctx = ctx.evaluation_context();
            let resolved = self.dispatcher.resolve_config(inputs, &eval_ctx);
            for (name, value) in resolved {
                ctx.set_variable(name.clone(), value.clone());
                seeded.insert(name, value);
            }
        }
        NodeResult::success(node.id.clone(), Value::Object(seeded), started_at)
    }

    /// Terminal marker. Records the run's outcome so far plus a message.
    fn execute_end(
        &self,
        node: &CompiledNode,
        ctx: &ExecutionContext,
        started_at: chrono::DateTime<Utc>,
    ) -> NodeResult {
        let status = if ctx.is_cancelled() {
            "cancelled"
        } else if self.snapshot.read().progress.failed > 0 {
            "failure"
        } else {
            "success"
        };
        let message = node
            .config
            .get("message")
            .map(|m| self.resolve_to_string(m, ctx))
            .unwrap_or_default();
        NodeResult::success(
            node.id.clone(),
            json!({"status": status, "message": message}),
            started_at,
        )
    }

    /// Sleep for `config.seconds`, interruptible by cancel.
    async fn execute_delay(
        &self,
        node: &CompiledNode,
        ctx: &ExecutionContext,
        started_at: chrono::DateTime<Utc>,
    ) -> NodeResult {
        let seconds = node
            .config
            .get("seconds")
            .map(|v| self.resolve_value(v, ctx))
            .as_ref()
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            .max(0.0);
        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs_f64(seconds)) => {
                NodeResult::success(node.id.clone(), json!({"seconds": seconds}), started_at)
            }
            () = ctx.cancellation().cancelled() => {
                NodeResult::cancelled(node.id.clone(), started_at)
            }
        }
    }

    /// Evaluate `config.expression`; truthy takes the `true` edge.
    fn execute_condition(
        &self,
        node: &CompiledNode,
        ctx: &ExecutionContext,
        started_at: chrono::DateTime<Utc>,
    ) -> NodeResult {
        let expression = node
            .config
            .get("expression")
            .and_then(Value::as_str)
            .unwrap_or("");
        let truthy = self
            .engine
            .evaluate_truthy(expression, &ctx.evaluation_context())
            .unwrap_or(false);
        let handle = if truthy { "true" } else { "false" };
        NodeResult::success(node.id.clone(), json!(truthy), started_at).with_next_handle(handle)
    }

    fn execute_variable_set(
        &self,
        node: &CompiledNode,
        ctx: &mut ExecutionContext,
        started_at: chrono::DateTime<Utc>,
    ) -> NodeResult {
        let name = node
            .config
            .get("name")
            .map(|n| self.resolve_to_string(n, ctx))
            .unwrap_or_default();
        if name.is_empty() {
            return NodeResult::failure(
                node.id.clone(),
                "variable_set requires a name",
                Value::Null,
                started_at,
            );
        }
        let value = node
            .config
            .get("value")
            .map(|v| self.resolve_value(v, ctx))
            .unwrap_or(Value::Null);
        ctx.set_variable(name, value.clone());
        NodeResult::success(node.id.clone(), value, started_at)
    }

    fn execute_variable_get(
        &self,
        node: &CompiledNode,
        ctx: &ExecutionContext,
        started_at: chrono::DateTime<Utc>,
    ) -> NodeResult {
        let name = node
            .config
            .get("name")
            .map(|n| self.resolve_to_string(n, ctx))
            .unwrap_or_default();
        let value = ctx.variable(&name).cloned().unwrap_or(Value::Null);
        NodeResult::success(node.id.clone(), value, started_at)
    }

    /// Fan-out marker: no `next_handle`, so every outgoing edge is active.
    /// Convergence is the ordinary level barrier downstream.
    fn execute_parallel(
        &self,
        node: &CompiledNode,
        started_at: chrono::DateTime<Utc>,
    ) -> NodeResult {
        let branches = node
            .outputs
            .keys()
            .filter(|h| h.starts_with("branch_"))
            .count();
        NodeResult::success(node.id.clone(), json!({"branches": branches}), started_at)
    }

    /// Run the loop body DAG once per item, with a fresh loop frame and
    /// cleared body results each iteration.
    async fn execute_loop(
        &self,
        node: &CompiledNode,
        ctx: &mut ExecutionContext,
        control: &mut ControlReceiver,
        started_at: chrono::DateTime<Utc>,
    ) -> NodeResult {
        let items = self.loop_items(node, ctx);
        let variable_name = node
            .config
            .get("variable_name")
            .map(|n| self.resolve_to_string(n, ctx))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "item".to_string());

        let empty_body = CompiledDag::default();
        let body = node.body.as_deref().unwrap_or(&empty_body);
        let body_ids = body.all_node_ids();

        let mut results = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            if ctx.is_cancelled() {
                return NodeResult::cancelled(node.id.clone(), started_at);
            }

            ctx.push_loop_frame(LoopFrame::new(index, items.clone()));
            ctx.set_variable(variable_name.clone(), item.clone());
            ctx.clear_results(body_ids.iter());
            {
                let mut snapshot = self.snapshot.write();
                for body_id in &body_ids {
                    snapshot.reset_node(body_id);
                }
            }

            let outcome = Box::pin(self.run_dag(body, ctx, control, false)).await;
            ctx.pop_loop_frame();

            match outcome {
                DagOutcome::Completed => results.push(self.body_output(body, ctx)),
                DagOutcome::Failed => {
                    return NodeResult::failure(
                        node.id.clone(),
                        format!("loop body failed on iteration {index}"),
                        json!({"iterations": index, "results": results}),
                        started_at,
                    );
                }
                DagOutcome::Cancelled => {
                    return NodeResult::cancelled(node.id.clone(), started_at);
                }
            }
        }

        NodeResult::success(
            node.id.clone(),
            json!({"iterations": items.len(), "results": results}),
            started_at,
        )
        .with_next_handle("complete")
    }

    /// The items a loop iterates: `count` mode counts up, `array` mode
    /// evaluates the configured expression.
    fn loop_items(&self, node: &CompiledNode, ctx: &ExecutionContext) -> Vec<Value> {
        let mode = node
            .config
            .get("mode")
            .and_then(Value::as_str)
            .unwrap_or("array");
        if mode == "count" {
            let count = node
                .config
                .get("count")
                .map(|v| self.resolve_value(v, ctx))
                .as_ref()
                .and_then(Value::as_u64)
                .unwrap_or(0);
            return (0..count).map(|i| json!(i)).collect();
        }
        match node.config.get("array").map(|v| self.resolve_value(v, ctx)) {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(single) => vec![single],
        }
    }

    /// What one iteration contributes to the loop's accumulator: the exit
    /// nodes' outputs (single exit → its value, several → keyed by id).
    fn body_output(&self, body: &CompiledDag, ctx: &ExecutionContext) -> Value {
        let outputs: Vec<(&NodeId, Value)> = body
            .exit_points
            .iter()
            .filter_map(|id| ctx.result(id).map(|r| (id, r.output.clone())))
            .collect();
        match outputs.len() {
            0 => Value::Null,
            1 => outputs.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null),
            _ => Value::Object(
                outputs
                    .into_iter()
                    .map(|(id, v)| (id.to_string(), v))
                    .collect(),
            ),
        }
    }

    // ── config resolution helpers ───────────────────────────────────

    fn resolve_value(&self, value: &Value, ctx: &ExecutionContext) -> Value {
        match value {
            Value::String(s) => self
                .engine
                .evaluate(s, &ctx.evaluation_context())
                .unwrap_or_else(|_| Value::String(s.clone())),
            other => other.clone(),
        }
    }

    fn resolve_to_string(&self, value: &Value, ctx: &ExecutionContext) -> String {
        match self.resolve_value(value, ctx) {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PauseOutcome {
    NotPaused,
    Resumed,
    CancelledWhilePaused,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
