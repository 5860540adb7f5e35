//! The block handler plugin surface.
//!
//! Concrete network-operation blocks (SSH exec, port scan, traffic capture,
//! ping) live outside the engine. They implement [`BlockHandler`] and are
//! registered by type string; the dispatcher hands them fully resolved
//! parameters and a cancellation token, nothing else.

use async_trait::async_trait;
use opsflow_core::Handle;
use opsflow_workflow::HandleSpec;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// The type of a declared block parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    /// Free-form string (may be a template).
    String,
    /// Numeric value.
    Number,
    /// Boolean value.
    Boolean,
    /// JSON array.
    Array,
    /// JSON object.
    Object,
}

/// A declared block parameter.
#[derive(Debug, Clone)]
pub struct ParameterSpec {
    /// Parameter name (key in the node's `config`).
    pub name: String,
    /// Expected type.
    pub kind: ParameterKind,
    /// Whether the parameter must be present.
    pub required: bool,
    /// Default used when absent.
    pub default: Option<Value>,
}

impl ParameterSpec {
    /// A required parameter.
    #[must_use]
    pub fn required(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            default: None,
        }
    }

    /// An optional parameter with a default.
    #[must_use]
    pub fn optional(name: impl Into<String>, kind: ParameterKind, default: Value) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: Some(default),
        }
    }
}

/// What a handler invocation produced.
#[derive(Debug, Clone)]
pub struct BlockOutcome {
    /// Whether the block succeeded.
    pub success: bool,
    /// Output value (shape per the block's output schema).
    pub output: Value,
    /// Error message when `success` is false.
    pub error: Option<String>,
    /// Active outgoing handle, for blocks that branch.
    pub next_handle: Option<Handle>,
}

impl BlockOutcome {
    /// A successful outcome.
    #[must_use]
    pub fn success(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            next_handle: None,
        }
    }

    /// A failed outcome.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            next_handle: None,
        }
    }

    /// Attach the active outgoing handle.
    #[must_use]
    pub fn with_next_handle(mut self, handle: impl Into<Handle>) -> Self {
        self.next_handle = Some(handle.into());
        self
    }
}

/// Errors raised by a handler (as opposed to a `success: false` outcome —
/// both feed the retry wrapper and error policy identically).
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The block failed.
    #[error("{0}")]
    Failed(String),

    /// The block observed cancellation and aborted.
    #[error("cancelled")]
    Cancelled,
}

/// A registered block implementation.
///
/// Handlers are pure functions of their resolved parameters; they never see
/// the execution context. Cancellation is cooperative: when the token fires,
/// return best-effort and promptly.
#[async_trait]
pub trait BlockHandler: Send + Sync {
    /// Human-readable block name.
    fn name(&self) -> &str;

    /// Declared input handles.
    fn input_handles(&self) -> Vec<HandleSpec> {
        vec![HandleSpec::required("in")]
    }

    /// Declared output handles.
    fn output_handles(&self) -> Vec<HandleSpec> {
        vec![HandleSpec::optional("out")]
    }

    /// Declared parameters.
    fn parameters(&self) -> Vec<ParameterSpec> {
        Vec::new()
    }

    /// JSON schema of the output value, if the block declares one.
    fn output_schema(&self) -> Option<Value> {
        None
    }

    /// Execute the block with fully resolved parameters.
    async fn invoke(
        &self,
        params: Value,
        cancel: CancellationToken,
    ) -> Result<BlockOutcome, HandlerError>;
}
