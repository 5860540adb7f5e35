//! Compile diagnostics.
//!
//! Errors are fatal: the compiler produces no DAG when any are present.
//! Warnings never block execution; they surface in the compile result for
//! the UI.

use opsflow_core::NodeId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal compile errors.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompileError {
    /// The document has no nodes at all.
    #[error("workflow has no nodes")]
    EmptyWorkflow,

    /// Two nodes share an id.
    #[error("duplicate node id: {node_id}")]
    DuplicateNodeId {
        /// The repeated id.
        node_id: NodeId,
    },

    /// Two edges share an id.
    #[error("duplicate edge id: {edge_id}")]
    DuplicateEdgeId {
        /// The repeated id.
        edge_id: String,
    },

    /// An edge references a node that does not exist.
    #[error("edge {edge_id} references unknown node: {node_id}")]
    DanglingEdge {
        /// The offending edge.
        edge_id: String,
        /// The missing node id.
        node_id: NodeId,
    },

    /// A node's block type has no registered descriptor.
    #[error("unknown block type '{block_type}' on node {node_id}")]
    UnknownBlockType {
        /// The node carrying the type.
        node_id: NodeId,
        /// The unrecognized type string.
        block_type: String,
    },

    /// An edge uses a handle the block does not declare.
    #[error("edge {edge_id}: block of node {node_id} declares no {direction} handle '{handle}'")]
    InvalidHandle {
        /// The offending edge.
        edge_id: String,
        /// The node whose block lacks the handle.
        node_id: NodeId,
        /// `"output"` or `"input"`.
        direction: String,
        /// The undeclared handle name.
        handle: String,
    },

    /// A parameter template failed to parse.
    #[error("node {node_id}, parameter '{parameter}': {message}")]
    TemplateSyntax {
        /// The node carrying the parameter.
        node_id: NodeId,
        /// The parameter key.
        parameter: String,
        /// The underlying syntax error.
        message: String,
    },

    /// A cycle remains after removing declared loop back-edges.
    #[error("workflow contains a cycle involving nodes: {}", nodes.iter().map(NodeId::as_str).collect::<Vec<_>>().join(", "))]
    CycleDetected {
        /// Every node still holding in-degree > 0 when Kahn's algorithm
        /// stalled, sorted by id.
        nodes: Vec<NodeId>,
    },

    /// An edge leaves a loop body without passing back through the loop node.
    #[error("edge {edge_id} escapes the body of loop {loop_id}")]
    LoopBodyEscape {
        /// The offending edge.
        edge_id: String,
        /// The loop whose body is escaped.
        loop_id: NodeId,
    },

    /// A settings value is out of range.
    #[error("invalid settings: {message}")]
    InvalidSettings {
        /// What was wrong.
        message: String,
    },
}

/// Non-fatal compile warnings.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompileWarning {
    /// A node is not reachable from any entry point.
    #[error("node {node_id} is unreachable from any entry point")]
    UnreachableNode {
        /// The unreachable node.
        node_id: NodeId,
    },

    /// A required input handle has no incoming edge.
    #[error("node {node_id}: required input '{handle}' is unconnected")]
    UnconnectedRequiredInput {
        /// The node with the dangling input.
        node_id: NodeId,
        /// The unconnected handle.
        handle: String,
    },

    /// Two `variable_set` nodes in the same band write the same variable;
    /// the resulting value is unspecified.
    #[error("variable '{variable}' is written by multiple nodes in the same band: {}", nodes.iter().map(NodeId::as_str).collect::<Vec<_>>().join(", "))]
    ConflictingVariableWrites {
        /// The contested variable name.
        variable: String,
        /// The writers, sorted by id.
        nodes: Vec<NodeId>,
    },
}
