//! The execution registry.
//!
//! Process-wide entry point for the control surface: start a run, read its
//! snapshot, subscribe to its events, send control commands, list known
//! runs. Terminal runs persist their snapshot to the document store and
//! stay in memory until the retention window expires.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use opsflow_core::{ExecutionId, WorkflowId};
use opsflow_eventbus::{
    ControlCommand, ControlReceiver, ControlSender, EventBus, EventSubscriber, control_channel,
};
use opsflow_execution::{ExecutionContext, ExecutionSnapshot, RunStatus};
use opsflow_workflow::{ErrorHandling, WorkflowDocument, WorkflowSettings, compile};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapters::{CredentialResolver, DocumentStore};
use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::events::RunEvents;
use crate::registry::HandlerRegistry;
use crate::scheduler::{DagOutcome, Scheduler};

/// Per-start overrides carried by the control surface.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Extra workflow-scope variables, layered over the document's.
    pub variables: Option<Map<String, Value>>,
    /// Error-handling override.
    pub error_handling: Option<ErrorHandling>,
    /// Compile and validate only; no nodes execute.
    pub dry_run: bool,
}

/// Registry tuning.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long terminal runs stay listable.
    pub retention: Duration,
    /// Per-subscriber event queue bound.
    pub event_capacity: usize,
    /// The read-only `$env` scope handed to every run.
    pub env: Map<String, Value>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 60 * 60),
            event_capacity: opsflow_eventbus::bus::DEFAULT_CAPACITY,
            env: Map::new(),
        }
    }
}

struct RunShared {
    workflow_id: WorkflowId,
    snapshot: Arc<RwLock<ExecutionSnapshot>>,
    bus: Arc<EventBus>,
    control: ControlSender,
    cancel: CancellationToken,
    terminal_at: RwLock<Option<Instant>>,
}

/// Process-wide mapping of active (and recently terminal) runs.
pub struct ExecutionRegistry {
    store: Arc<dyn DocumentStore>,
    credentials: Arc<dyn CredentialResolver>,
    handlers: Arc<HandlerRegistry>,
    runs: DashMap<ExecutionId, Arc<RunShared>>,
    config: RegistryConfig,
}

impl ExecutionRegistry {
    /// Create a registry with default configuration.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        credentials: Arc<dyn CredentialResolver>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        Self::with_config(store, credentials, handlers, RegistryConfig::default())
    }

    /// Create a registry with explicit configuration.
    #[must_use]
    pub fn with_config(
        store: Arc<dyn DocumentStore>,
        credentials: Arc<dyn CredentialResolver>,
        handlers: Arc<HandlerRegistry>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            store,
            credentials,
            handlers,
            runs: DashMap::new(),
            config,
        }
    }

    /// Load, compile, and launch a workflow. Returns as soon as the
    /// scheduler task is spawned; compile failures surface as a `failed`
    /// run, not an error here.
    pub async fn start(
        &self,
        workflow_id: WorkflowId,
        options: StartOptions,
    ) -> Result<ExecutionId, EngineError> {
        self.prune_expired();

        let document = self.store.get(workflow_id).await?;
        let execution_id = ExecutionId::v4();

        let mut settings = document.settings.clone();
        if let Some(error_handling) = options.error_handling {
            settings.error_handling = error_handling;
        }
        let mut variables = document.variables.clone();
        if let Some(overrides) = options.variables {
            variables.extend(overrides);
        }

        let bus = Arc::new(EventBus::new(self.config.event_capacity));
        let (control_tx, control_rx) = control_channel();
        let shared = Arc::new(RunShared {
            workflow_id,
            snapshot: Arc::new(RwLock::new(ExecutionSnapshot::new(
                execution_id,
                workflow_id,
                &[],
            ))),
            bus: Arc::clone(&bus),
            control: control_tx,
            cancel: CancellationToken::new(),
            terminal_at: RwLock::new(None),
        });
        self.runs.insert(execution_id, Arc::clone(&shared));

        let task = RunTask {
            shared,
            store: Arc::clone(&self.store),
            credentials: Arc::clone(&self.credentials),
            handlers: Arc::clone(&self.handlers),
            document,
            settings,
            variables,
            env: self.config.env.clone(),
            dry_run: options.dry_run,
            control_rx,
        };
        tokio::spawn(task.run());

        Ok(execution_id)
    }

    /// The current snapshot of a run.
    #[must_use]
    pub fn get(&self, execution_id: ExecutionId) -> Option<ExecutionSnapshot> {
        self.runs
            .get(&execution_id)
            .map(|shared| shared.snapshot.read().clone())
    }

    /// Subscribe to a run's ordered event stream. Each subscriber gets its
    /// own queue.
    pub fn subscribe(&self, execution_id: ExecutionId) -> Result<EventSubscriber, EngineError> {
        self.runs
            .get(&execution_id)
            .map(|shared| shared.bus.subscribe())
            .ok_or(EngineError::ExecutionNotFound(execution_id))
    }

    /// Forward a control command to a run. `cancel` also trips the run's
    /// cancellation token immediately so sleeps and backoffs wake up.
    pub fn send_control(
        &self,
        execution_id: ExecutionId,
        command: ControlCommand,
    ) -> Result<(), EngineError> {
        let shared = self
            .runs
            .get(&execution_id)
            .ok_or(EngineError::ExecutionNotFound(execution_id))?;
        if command == ControlCommand::Cancel {
            shared.cancel.cancel();
        }
        // The receiver is gone once the run is terminal; both cancels and
        // late commands are no-ops then.
        let _ = shared.control.send(command);
        Ok(())
    }

    /// All known runs, newest state included, terminal runs retained for
    /// the configured window.
    #[must_use]
    pub fn list(&self) -> Vec<ExecutionSnapshot> {
        self.prune_expired();
        let mut snapshots: Vec<ExecutionSnapshot> = self
            .runs
            .iter()
            .map(|entry| entry.snapshot.read().clone())
            .collect();
        snapshots.sort_by_key(|s| s.id);
        snapshots
    }

    /// Number of runs currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Whether no runs are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    fn prune_expired(&self) {
        let retention = self.config.retention;
        self.runs.retain(|_, shared| {
            shared
                .terminal_at
                .read()
                .is_none_or(|at| at.elapsed() < retention)
        });
    }
}

impl std::fmt::Debug for ExecutionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionRegistry")
            .field("runs", &self.runs.len())
            .finish_non_exhaustive()
    }
}

/// One run's lifecycle, from compile to terminal snapshot.
struct RunTask {
    shared: Arc<RunShared>,
    store: Arc<dyn DocumentStore>,
    credentials: Arc<dyn CredentialResolver>,
    handlers: Arc<HandlerRegistry>,
    document: WorkflowDocument,
    settings: WorkflowSettings,
    variables: Map<String, Value>,
    env: Map<String, Value>,
    dry_run: bool,
    control_rx: ControlReceiver,
}

impl RunTask {
    async fn run(mut self) {
        let events = RunEvents::new(Arc::clone(&self.shared.bus));
        let execution_id = self.shared.snapshot.read().id;

        self.transition(&events, RunStatus::Compiling);
        let compiled = compile(&self.document, self.handlers.as_ref());
        for warning in &compiled.warnings {
            debug!(%execution_id, %warning, "compile warning");
        }

        let Some(dag) = compiled.dag.filter(|_| compiled.is_valid) else {
            let messages: Vec<String> = compiled.errors.iter().map(ToString::to_string).collect();
            let joined = messages.join("; ");
            {
                let mut snapshot = self.shared.snapshot.write();
                snapshot.errors = messages;
            }
            events.error(format!("compile failed: {joined}"));
            self.transition(&events, RunStatus::Failed);
            self.finish(&events).await;
            return;
        };

        {
            let mut snapshot = self.shared.snapshot.write();
            let node_ids = dag.all_node_ids();
            *snapshot = ExecutionSnapshot::new(execution_id, self.shared.workflow_id, &node_ids);
            snapshot.status = RunStatus::Compiling;
            snapshot.total_levels = dag.execution_order.len();
            snapshot.variables = self.variables.clone();
        }

        self.transition(&events, RunStatus::Validating);
        self.transition(&events, RunStatus::Running);

        if self.dry_run {
            debug!(%execution_id, "dry run: stopping after validation");
            self.transition(&events, RunStatus::Completed);
            self.finish(&events).await;
            return;
        }

        let mut ctx = ExecutionContext::new(execution_id, self.shared.workflow_id)
            .with_variables(self.variables.clone())
            .with_env(self.env.clone())
            .with_cancellation(self.shared.cancel.clone());

        // Run-wide timeout: a watchdog trips the cancellation token and the
        // terminal status becomes failed instead of cancelled.
        let timed_out = Arc::new(AtomicBool::new(false));
        let watchdog = (self.settings.timeout_s > 0).then(|| {
            let cancel = self.shared.cancel.clone();
            let flag = Arc::clone(&timed_out);
            let limit = Duration::from_secs(self.settings.timeout_s);
            tokio::spawn(async move {
                tokio::select! {
                    () = tokio::time::sleep(limit) => {
                        flag.store(true, Ordering::SeqCst);
                        cancel.cancel();
                    }
                    () = cancel.cancelled() => {}
                }
            })
        });

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&self.handlers),
            Arc::clone(&self.credentials),
        ));
        let scheduler = Scheduler::new(
            dispatcher,
            self.settings.clone(),
            events.clone(),
            Arc::clone(&self.shared.snapshot),
        );

        let outcome = scheduler.run(&dag, &mut ctx, &mut self.control_rx).await;

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        let final_status = match outcome {
            DagOutcome::Completed => RunStatus::Completed,
            DagOutcome::Failed => RunStatus::Failed,
            DagOutcome::Cancelled if timed_out.load(Ordering::SeqCst) => RunStatus::Failed,
            DagOutcome::Cancelled => RunStatus::Cancelled,
        };

        {
            let mut snapshot = self.shared.snapshot.write();
            snapshot.variables = ctx.variables().clone();
            if timed_out.load(Ordering::SeqCst) {
                let message = format!("run timed out after {}s", self.settings.timeout_s);
                snapshot.errors.push(message.clone());
                drop(snapshot);
                events.error(message);
            }
        }

        // Final progress re-sync before the terminal events.
        let (progress, current_level, total_levels) = {
            let snapshot = self.shared.snapshot.read();
            (snapshot.progress, snapshot.current_level, snapshot.total_levels)
        };
        events.progress(progress, current_level, total_levels);

        self.transition(&events, final_status);
        self.finish(&events).await;
    }

    fn transition(&self, events: &RunEvents, to: RunStatus) {
        let mut snapshot = self.shared.snapshot.write();
        let from = snapshot.status;
        match snapshot.transition(to) {
            Ok(()) => {
                drop(snapshot);
                events.run_state_changed(from, to);
            }
            Err(e) => warn!(%from, %to, error = %e, "rejected run transition"),
        }
    }

    /// Persist the terminal snapshot and emit the closing `complete` event.
    /// A store failure is recorded as a snapshot warning, never a run
    /// failure.
    async fn finish(&self, events: &RunEvents) {
        *self.shared.terminal_at.write() = Some(Instant::now());

        let snapshot = self.shared.snapshot.read().clone();
        if let Err(e) = self.store.put_execution(&snapshot).await {
            warn!(execution_id = %snapshot.id, error = %e, "failed to persist execution snapshot");
            self.shared
                .snapshot
                .write()
                .errors
                .push(format!("snapshot persistence failed: {e}"));
        }

        let final_snapshot = self.shared.snapshot.read().clone();
        events.complete(final_snapshot);
    }
}

