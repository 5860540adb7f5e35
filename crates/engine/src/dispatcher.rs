//! The block dispatcher.
//!
//! One dispatch: resolve the node's config through the expression engine,
//! substitute credentials, look up the handler, invoke it under the
//! per-node timeout, and wrap the outcome (with timing) into a
//! [`NodeResult`]. The retry wrapper sits on top and feeds only the final
//! attempt to the error-handling policy.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use opsflow_execution::NodeResult;
use opsflow_expression::{EvaluationContext, ExpressionEngine};
use opsflow_workflow::{CompiledNode, WorkflowSettings};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapters::CredentialResolver;
use crate::events::RunEvents;
use crate::registry::HandlerRegistry;

/// Resolves parameters and invokes block handlers.
pub struct Dispatcher {
    handlers: Arc<HandlerRegistry>,
    credentials: Arc<dyn CredentialResolver>,
    engine: ExpressionEngine,
}

impl Dispatcher {
    /// Create a dispatcher over a handler registry and credential resolver.
    #[must_use]
    pub fn new(handlers: Arc<HandlerRegistry>, credentials: Arc<dyn CredentialResolver>) -> Self {
        Self {
            handlers,
            credentials,
            engine: ExpressionEngine::new(),
        }
    }

    /// Resolve every entry of a node's config against the evaluation
    /// context. String values run through the template engine; arrays and
    /// objects resolve recursively; other literals pass through.
    #[must_use]
    pub fn resolve_config(
        &self,
        config: &Map<String, Value>,
        eval_ctx: &EvaluationContext,
    ) -> Map<String, Value> {
        let mut resolved = Map::new();
        for (key, value) in config {
            resolved.insert(key.clone(), self.resolve_value(value, eval_ctx));
        }
        resolved
    }

    fn resolve_value(&self, value: &Value, eval_ctx: &EvaluationContext) -> Value {
        match value {
            Value::String(s) => {
                // Templates were pre-validated at compile time; a parse
                // error here means the config was mutated post-compile, and
                // the string passes through verbatim.
                self.engine
                    .evaluate(s, eval_ctx)
                    .unwrap_or_else(|_| Value::String(s.clone()))
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.resolve_value(item, eval_ctx))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v, eval_ctx)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Execute one attempt of a non-control node.
    pub async fn dispatch(
        &self,
        node: &CompiledNode,
        eval_ctx: &EvaluationContext,
        cancel: CancellationToken,
        settings: &WorkflowSettings,
    ) -> NodeResult {
        let started_at = Utc::now();

        if cancel.is_cancelled() {
            return NodeResult::cancelled(node.id.clone(), started_at);
        }

        let mut resolved = self.resolve_config(&node.config, eval_ctx);

        // Substitute credentials. Inline fields take precedence and are
        // preserved.
        if let Some(credential_id) = resolved
            .get("credential_id")
            .and_then(Value::as_str)
            .map(str::to_string)
        {
            match self.credentials.resolve(&credential_id).await {
                Ok(credential) => {
                    for (key, value) in credential.fields() {
                        resolved.entry(key).or_insert(value);
                    }
                }
                Err(e) => {
                    warn!(node_id = %node.id, error = %e, "credential resolution failed");
                    return NodeResult::failure(
                        node.id.clone(),
                        e.to_string(),
                        Value::Null,
                        started_at,
                    );
                }
            }
        }

        let Some(handler) = self.handlers.lookup(&node.block_type) else {
            return NodeResult::failure(
                node.id.clone(),
                format!("unknown block type: {}", node.block_type),
                Value::Null,
                started_at,
            );
        };

        // Per-node timeout: node config, else the workflow setting, else
        // unbounded.
        let timeout = resolved
            .get("timeout")
            .and_then(Value::as_f64)
            .filter(|t| *t > 0.0)
            .map(Duration::from_secs_f64)
            .or_else(|| {
                (settings.timeout_s > 0).then(|| Duration::from_secs(settings.timeout_s))
            });

        debug!(node_id = %node.id, block_type = %node.block_type, ?timeout, "dispatching");

        let invocation = handler.invoke(Value::Object(resolved), cancel.child_token());
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, invocation).await {
                Ok(result) => result,
                Err(_) => {
                    return NodeResult::failure(
                        node.id.clone(),
                        format!("timed out after {:.1}s", limit.as_secs_f64()),
                        Value::Null,
                        started_at,
                    );
                }
            },
            None => invocation.await,
        };

        match outcome {
            Ok(outcome) => {
                let mut result = if outcome.success {
                    NodeResult::success(node.id.clone(), outcome.output, started_at)
                } else {
                    NodeResult::failure(
                        node.id.clone(),
                        outcome.error.unwrap_or_else(|| "block failed".into()),
                        outcome.output,
                        started_at,
                    )
                };
                if let Some(handle) = outcome.next_handle {
                    result = result.with_next_handle(handle);
                }
                result
            }
            Err(e) => NodeResult::failure(node.id.clone(), e.to_string(), Value::Null, started_at),
        }
    }

    /// Dispatch with the retry wrapper: up to `retry_count` additional
    /// attempts, a cancel-interruptible fixed delay between them, and
    /// `node_error`/`node_retry` events per failed attempt. Only the final
    /// attempt's result is returned.
    pub async fn dispatch_with_retry(
        &self,
        node: &CompiledNode,
        eval_ctx: &EvaluationContext,
        cancel: CancellationToken,
        settings: &WorkflowSettings,
        events: &RunEvents,
    ) -> NodeResult {
        let mut attempt: u32 = 0;
        loop {
            let result = self
                .dispatch(node, eval_ctx, cancel.clone(), settings)
                .await;
            if result.success {
                return result;
            }

            let will_retry = attempt < settings.retry_count && !cancel.is_cancelled();
            events.node_error(
                &node.id,
                result.error.as_deref().unwrap_or("failed"),
                attempt + 1,
                will_retry,
            );
            if !will_retry {
                return result;
            }

            events.node_retry(&node.id, attempt + 1);
            let backoff = Duration::from_millis(settings.retry_delay_ms);
            tokio::select! {
                () = tokio::time::sleep(backoff) => {}
                () = cancel.cancelled() => return result,
            }
            attempt += 1;
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Credential, StaticCredentialResolver};
    use crate::handler::{BlockHandler, BlockOutcome, HandlerError};
    use async_trait::async_trait;
    use opsflow_core::{BlockType, NodeId};
    use opsflow_eventbus::{EventBus, ExecutionEvent};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct EchoHandler;

    #[async_trait]
    impl BlockHandler for EchoHandler {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(
            &self,
            params: Value,
            _cancel: CancellationToken,
        ) -> Result<BlockOutcome, HandlerError> {
            Ok(BlockOutcome::success(params))
        }
    }

    struct FlakyHandler {
        failures: AtomicU32,
    }

    #[async_trait]
    impl BlockHandler for FlakyHandler {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn invoke(
            &self,
            params: Value,
            _cancel: CancellationToken,
        ) -> Result<BlockOutcome, HandlerError> {
            if self.failures.fetch_sub(1, Ordering::SeqCst) > 0 {
                Ok(BlockOutcome::failure("transient"))
            } else {
                Ok(BlockOutcome::success(params))
            }
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl BlockHandler for SlowHandler {
        fn name(&self) -> &str {
            "slow"
        }

        async fn invoke(
            &self,
            _params: Value,
            _cancel: CancellationToken,
        ) -> Result<BlockOutcome, HandlerError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(BlockOutcome::success(Value::Null))
        }
    }

    fn bt(s: &str) -> BlockType {
        BlockType::new(s).unwrap()
    }

    fn nid(s: &str) -> NodeId {
        NodeId::new(s).unwrap()
    }

    fn node(block_type: &str, config: Value) -> CompiledNode {
        CompiledNode {
            id: nid("n"),
            block_type: bt(block_type),
            config: config.as_object().cloned().unwrap_or_default(),
            dependencies: Default::default(),
            inputs: Vec::new(),
            outputs: Default::default(),
            level: 0,
            body: None,
        }
    }

    fn dispatcher() -> Dispatcher {
        let handlers = Arc::new(HandlerRegistry::new());
        handlers.register(bt("test.echo"), Arc::new(EchoHandler));
        handlers.register(bt("test.slow"), Arc::new(SlowHandler));
        let resolver = Arc::new(StaticCredentialResolver::new());
        resolver.insert(
            "cred-1",
            Credential {
                username: "admin".into(),
                password: Some("s3cret".into()),
                private_key: None,
            },
        );
        Dispatcher::new(handlers, resolver)
    }

    fn eval_ctx() -> EvaluationContext {
        let mut vars = Map::new();
        vars.insert("host".into(), json!("10.0.0.1"));
        EvaluationContext::builder().vars(vars).build()
    }

    #[tokio::test]
    async fn resolves_templates_before_invoking() {
        let d = dispatcher();
        let n = node("test.echo", json!({"host": "{{ $vars.host }}", "count": 3}));
        let result = d
            .dispatch(&n, &eval_ctx(), CancellationToken::new(), &WorkflowSettings::default())
            .await;
        assert!(result.success);
        assert_eq!(result.output, json!({"host": "10.0.0.1", "count": 3}));
    }

    #[tokio::test]
    async fn substitutes_credentials_without_clobbering_inline_fields() {
        let d = dispatcher();
        let n = node(
            "test.echo",
            json!({"credential_id": "cred-1", "username": "override"}),
        );
        let result = d
            .dispatch(&n, &eval_ctx(), CancellationToken::new(), &WorkflowSettings::default())
            .await;
        assert!(result.success);
        assert_eq!(result.output["username"], json!("override"));
        assert_eq!(result.output["password"], json!("s3cret"));
    }

    #[tokio::test]
    async fn unknown_credential_fails_the_node() {
        let d = dispatcher();
        let n = node("test.echo", json!({"credential_id": "ghost"}));
        let result = d
            .dispatch(&n, &eval_ctx(), CancellationToken::new(), &WorkflowSettings::default())
            .await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("credential"));
    }

    #[tokio::test]
    async fn unknown_block_type_fails_the_node() {
        let d = dispatcher();
        let n = node("test.ghost", json!({}));
        let result = d
            .dispatch(&n, &eval_ctx(), CancellationToken::new(), &WorkflowSettings::default())
            .await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("unknown block type"));
    }

    #[tokio::test]
    async fn cancelled_before_dispatch_returns_cancelled() {
        let d = dispatcher();
        let n = node("test.echo", json!({}));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = d
            .dispatch(&n, &eval_ctx(), cancel, &WorkflowSettings::default())
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("cancelled"));
    }

    #[tokio::test(start_paused = true)]
    async fn per_node_timeout_fails_the_node() {
        let d = dispatcher();
        let n = node("test.slow", json!({"timeout": 1}));
        let result = d
            .dispatch(&n, &eval_ctx(), CancellationToken::new(), &WorkflowSettings::default())
            .await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn retry_wrapper_recovers_and_emits_events() {
        let handlers = Arc::new(HandlerRegistry::new());
        handlers.register(
            bt("test.flaky"),
            Arc::new(FlakyHandler {
                failures: AtomicU32::new(2),
            }),
        );
        let d = Dispatcher::new(handlers, Arc::new(StaticCredentialResolver::new()));

        let bus = Arc::new(EventBus::default());
        let mut sub = bus.subscribe();
        let events = RunEvents::new(Arc::clone(&bus));

        let settings = WorkflowSettings {
            retry_count: 2,
            retry_delay_ms: 1,
            ..Default::default()
        };
        let n = node("test.flaky", json!({}));
        let result = d
            .dispatch_with_retry(&n, &eval_ctx(), CancellationToken::new(), &settings, &events)
            .await;

        assert!(result.success);
        let emitted = sub.drain();
        let retries: Vec<_> = emitted
            .iter()
            .filter(|e| matches!(e, ExecutionEvent::NodeRetry { .. }))
            .collect();
        assert_eq!(retries.len(), 2);
        let errors: Vec<_> = emitted
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::NodeError { attempt, will_retry, .. } => {
                    Some((*attempt, *will_retry))
                }
                _ => None,
            })
            .collect();
        assert_eq!(errors, vec![(1, true), (2, true)]);
    }

    #[tokio::test]
    async fn retry_exhaustion_returns_final_failure() {
        let handlers = Arc::new(HandlerRegistry::new());
        handlers.register(
            bt("test.flaky"),
            Arc::new(FlakyHandler {
                failures: AtomicU32::new(10),
            }),
        );
        let d = Dispatcher::new(handlers, Arc::new(StaticCredentialResolver::new()));
        let bus = Arc::new(EventBus::default());
        let mut sub = bus.subscribe();
        let events = RunEvents::new(Arc::clone(&bus));

        let settings = WorkflowSettings {
            retry_count: 1,
            retry_delay_ms: 1,
            ..Default::default()
        };
        let n = node("test.flaky", json!({}));
        let result = d
            .dispatch_with_retry(&n, &eval_ctx(), CancellationToken::new(), &settings, &events)
            .await;

        assert!(!result.success);
        let emitted = sub.drain();
        let final_error = emitted
            .iter()
            .rev()
            .find_map(|e| match e {
                ExecutionEvent::NodeError { will_retry, attempt, .. } => {
                    Some((*attempt, *will_retry))
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(final_error, (2, false));
    }
}
