//! Typed emit helpers over a run's event bus.

use std::sync::Arc;

use opsflow_core::NodeId;
use opsflow_eventbus::{EventBus, ExecutionEvent, SkipReason};
use opsflow_execution::{ExecutionSnapshot, NodeResult, Progress, RunStatus};

/// Cheap-to-clone handle the scheduler and workers emit through.
#[derive(Clone)]
pub struct RunEvents {
    bus: Arc<EventBus>,
}

impl RunEvents {
    /// Wrap a run's bus.
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    /// The underlying bus.
    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Emit a progress update.
    pub fn progress(&self, progress: Progress, current_level: usize, total_levels: usize) {
        self.bus.emit(ExecutionEvent::Progress {
            completed: progress.completed,
            failed: progress.failed,
            skipped: progress.skipped,
            total: progress.total,
            percentage: progress.percentage,
            current_level,
            total_levels,
        });
    }

    /// Emit a node dispatch.
    pub fn node_start(&self, node_id: &NodeId) {
        self.bus.emit(ExecutionEvent::NodeStart {
            node_id: node_id.clone(),
        });
    }

    /// Emit a node's terminal result.
    pub fn node_complete(&self, result: &NodeResult) {
        self.bus.emit(ExecutionEvent::NodeComplete {
            node_id: result.node_id.clone(),
            result: result.clone(),
        });
    }

    /// Emit a failed attempt.
    pub fn node_error(&self, node_id: &NodeId, error: &str, attempt: u32, will_retry: bool) {
        self.bus.emit(ExecutionEvent::NodeError {
            node_id: node_id.clone(),
            error: error.to_string(),
            attempt,
            will_retry,
        });
    }

    /// Emit an upcoming retry.
    pub fn node_retry(&self, node_id: &NodeId, attempt: u32) {
        self.bus.emit(ExecutionEvent::NodeRetry {
            node_id: node_id.clone(),
            attempt,
        });
    }

    /// Emit a skip.
    pub fn node_skipped(&self, node_id: &NodeId, reason: SkipReason) {
        self.bus.emit(ExecutionEvent::NodeSkipped {
            node_id: node_id.clone(),
            reason,
        });
    }

    /// Emit a run-level state transition.
    pub fn run_state_changed(&self, from: RunStatus, to: RunStatus) {
        self.bus
            .emit(ExecutionEvent::RunStateChanged { from, to });
    }

    /// Emit the terminal summary and close the bus.
    pub fn complete(&self, summary: ExecutionSnapshot) {
        self.bus.emit(ExecutionEvent::Complete {
            summary: Box::new(summary),
        });
        self.bus.close();
    }

    /// Emit a fatal run-level error.
    pub fn error(&self, message: impl Into<String>) {
        self.bus.emit(ExecutionEvent::Error {
            message: message.into(),
        });
    }

    /// Whether progress events were shed since the last check (consumers
    /// need a synthetic re-sync).
    #[must_use]
    pub fn take_progress_dropped(&self) -> bool {
        self.bus.take_progress_dropped()
    }
}

impl std::fmt::Debug for RunEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunEvents").finish_non_exhaustive()
    }
}
