//! The workflow compiler.
//!
//! Turns a [`WorkflowDocument`] into an executable [`CompiledDag`]:
//!
//! 1. Structural validation — duplicate ids, dangling edge references.
//! 2. Template pre-validation of every parameter string.
//! 3. Handle validation against block descriptors.
//! 4. Loop desugaring — each `control.loop` body subgraph is carved out and
//!    compiled into its own nested mini-DAG; the loop node becomes a single
//!    compound node at the outer level.
//! 5. Cycle detection per scope via Kahn's algorithm, reporting every node
//!    still holding in-degree > 0.
//! 6. Level assignment and banding, node ids ascending within a band.
//! 7. Entry/exit identification and warnings (unreachable nodes,
//!    unconnected required inputs, conflicting same-band variable writes).
//!
//! The compiler is deterministic: the same document yields an identical
//! result, ordering included.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use indexmap::IndexMap;
use opsflow_core::{Handle, NodeId};
use opsflow_expression::ExpressionEngine;
use serde_json::{Map, Value};
use tracing::debug;

use crate::descriptor::{BlockCatalog, BlockDescriptor, control_descriptor};
use crate::document::{EdgeDocument, NodeDocument, WorkflowDocument};
use crate::error::{CompileError, CompileWarning};
use crate::graph::DependencyGraph;

/// An executable node produced by the compiler.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledNode {
    /// Node id.
    pub id: NodeId,
    /// Block type.
    pub block_type: opsflow_core::BlockType,
    /// Raw (unresolved) parameter mapping.
    pub config: Map<String, Value>,
    /// Nodes whose completion must precede this node (within the scope).
    pub dependencies: BTreeSet<NodeId>,
    /// Incoming edges as `(source, source_handle)` pairs, sorted.
    pub inputs: Vec<(NodeId, Handle)>,
    /// Outgoing edges: handle → successor ids, sorted.
    pub outputs: BTreeMap<Handle, Vec<NodeId>>,
    /// Dependency depth from the scope's entry points.
    pub level: usize,
    /// The loop body mini-DAG for `control.loop` compound nodes.
    pub body: Option<Box<CompiledDag>>,
}

/// An executable DAG for one scope (the outer workflow or a loop body).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledDag {
    /// Nodes keyed by id, in id-ascending order.
    pub nodes: IndexMap<NodeId, CompiledNode>,
    /// Level bands in execution order.
    pub execution_order: Vec<Vec<NodeId>>,
    /// Nodes with no dependencies in this scope.
    pub entry_points: Vec<NodeId>,
    /// Nodes with no successors in this scope.
    pub exit_points: Vec<NodeId>,
}

impl CompiledDag {
    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&CompiledNode> {
        self.nodes.get(id)
    }

    /// Total nodes in this scope plus all nested loop bodies.
    #[must_use]
    pub fn total_nodes(&self) -> usize {
        self.nodes
            .values()
            .map(|n| 1 + n.body.as_ref().map_or(0, |b| b.total_nodes()))
            .sum()
    }

    /// Every node id in this scope and all nested loop bodies, id-ascending
    /// within each scope.
    #[must_use]
    pub fn all_node_ids(&self) -> Vec<NodeId> {
        let mut ids = Vec::with_capacity(self.nodes.len());
        for node in self.nodes.values() {
            ids.push(node.id.clone());
            if let Some(body) = &node.body {
                ids.extend(body.all_node_ids());
            }
        }
        ids
    }
}

/// The outcome of compiling a document.
#[derive(Debug, Clone, Default)]
pub struct CompileResult {
    /// `true` when no fatal errors were found and a DAG was produced.
    pub is_valid: bool,
    /// Fatal errors, in discovery order.
    pub errors: Vec<CompileError>,
    /// Non-fatal warnings, in discovery order.
    pub warnings: Vec<CompileWarning>,
    /// The executable DAG, present iff `is_valid`.
    pub dag: Option<CompiledDag>,
}

/// Compile a workflow document against a block catalog.
#[must_use]
pub fn compile(doc: &WorkflowDocument, catalog: &dyn BlockCatalog) -> CompileResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if doc.settings.parallel_limit == 0 {
        errors.push(CompileError::InvalidSettings {
            message: "parallel_limit must be at least 1".into(),
        });
    }

    if doc.nodes.is_empty() {
        errors.push(CompileError::EmptyWorkflow);
        return CompileResult {
            is_valid: false,
            errors,
            warnings,
            dag: None,
        };
    }

    // 1. Structural checks: duplicates, dangling references.
    let mut node_ids: HashSet<&NodeId> = HashSet::new();
    for node in &doc.nodes {
        if !node_ids.insert(&node.id) {
            errors.push(CompileError::DuplicateNodeId {
                node_id: node.id.clone(),
            });
        }
    }
    let mut edge_ids: HashSet<&str> = HashSet::new();
    for edge in &doc.edges {
        if !edge_ids.insert(edge.id.as_str()) {
            errors.push(CompileError::DuplicateEdgeId {
                edge_id: edge.id.clone(),
            });
        }
        for endpoint in [&edge.source, &edge.target] {
            if !node_ids.contains(endpoint) {
                errors.push(CompileError::DanglingEdge {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
    }

    // 2. Template pre-validation of every parameter string.
    let engine = ExpressionEngine::new();
    for node in &doc.nodes {
        for (key, value) in &node.config {
            check_templates(&engine, &node.id, key, value, &mut errors);
        }
    }

    // 3. Descriptor lookup and handle validation.
    let mut descriptors: HashMap<&NodeId, BlockDescriptor> = HashMap::new();
    for node in &doc.nodes {
        let descriptor = if node.block_type.is_control() {
            control_descriptor(&node.block_type)
        } else {
            catalog.descriptor(&node.block_type)
        };
        match descriptor {
            Some(d) => {
                descriptors.insert(&node.id, d);
            }
            None => errors.push(CompileError::UnknownBlockType {
                node_id: node.id.clone(),
                block_type: node.block_type.as_str().to_string(),
            }),
        }
    }
    for edge in &doc.edges {
        if let Some(d) = descriptors.get(&edge.source) {
            if !d.has_output(&edge.source_handle) {
                errors.push(CompileError::InvalidHandle {
                    edge_id: edge.id.clone(),
                    node_id: edge.source.clone(),
                    direction: "output".into(),
                    handle: edge.source_handle.clone(),
                });
            }
        }
        if let Some(d) = descriptors.get(&edge.target) {
            if !d.has_input(&edge.target_handle) {
                errors.push(CompileError::InvalidHandle {
                    edge_id: edge.id.clone(),
                    node_id: edge.target.clone(),
                    direction: "input".into(),
                    handle: edge.target_handle.clone(),
                });
            }
        }
    }

    if !errors.is_empty() {
        return CompileResult {
            is_valid: false,
            errors,
            warnings,
            dag: None,
        };
    }

    // Warnings computed on the full graph, loop back-edges included, so loop
    // bodies count as reachable.
    let full_graph = DependencyGraph::new(
        doc.nodes.iter().map(|n| &n.id),
        doc.edges.iter().map(|e| (&e.source, &e.target)),
    );
    let entries = full_graph.entry_nodes();
    let reachable = full_graph.reachable_from(&entries);
    let mut unreachable: Vec<&NodeId> = doc
        .nodes
        .iter()
        .map(|n| &n.id)
        .filter(|id| !reachable.contains(id))
        .collect();
    unreachable.sort();
    for node_id in unreachable {
        warnings.push(CompileWarning::UnreachableNode {
            node_id: node_id.clone(),
        });
    }

    let connected: HashSet<(&NodeId, &str)> = doc
        .edges
        .iter()
        .map(|e| (&e.target, e.target_handle.as_str()))
        .collect();
    for node in &doc.nodes {
        if let Some(d) = descriptors.get(&node.id) {
            for input in d.inputs.iter().filter(|h| h.required) {
                if !connected.contains(&(&node.id, input.name.as_str())) {
                    warnings.push(CompileWarning::UnconnectedRequiredInput {
                        node_id: node.id.clone(),
                        handle: input.name.clone(),
                    });
                }
            }
        }
    }

    // 4–7. Scope split, cycle check, levels, bands.
    let node_refs: Vec<&NodeDocument> = doc.nodes.iter().collect();
    let edge_refs: Vec<&EdgeDocument> = doc.edges.iter().collect();
    match compile_scope(&node_refs, &edge_refs, &mut warnings) {
        Ok(dag) => {
            debug!(
                nodes = dag.total_nodes(),
                levels = dag.execution_order.len(),
                "workflow compiled"
            );
            CompileResult {
                is_valid: true,
                errors,
                warnings,
                dag: Some(dag),
            }
        }
        Err(mut scope_errors) => {
            errors.append(&mut scope_errors);
            CompileResult {
                is_valid: false,
                errors,
                warnings,
                dag: None,
            }
        }
    }
}

/// Recursively validate template strings inside a config value.
fn check_templates(
    engine: &ExpressionEngine,
    node_id: &NodeId,
    key: &str,
    value: &Value,
    errors: &mut Vec<CompileError>,
) {
    match value {
        Value::String(s) => {
            if let Err(e) = engine.check(s) {
                errors.push(CompileError::TemplateSyntax {
                    node_id: node_id.clone(),
                    parameter: key.to_string(),
                    message: e.to_string(),
                });
            }
        }
        Value::Array(items) => {
            for item in items {
                check_templates(engine, node_id, key, item, errors);
            }
        }
        Value::Object(map) => {
            for nested in map.values() {
                check_templates(engine, node_id, key, nested, errors);
            }
        }
        _ => {}
    }
}

/// Compile one scope (the outer workflow or a loop body) into a DAG.
fn compile_scope(
    nodes: &[&NodeDocument],
    edges: &[&EdgeDocument],
    warnings: &mut Vec<CompileWarning>,
) -> Result<CompiledDag, Vec<CompileError>> {
    let in_scope: HashSet<&NodeId> = nodes.iter().map(|n| &n.id).collect();

    // Carve out each loop's body subgraph.
    let mut body_of: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
    let mut all_body_nodes: HashSet<NodeId> = HashSet::new();
    let mut errors = Vec::new();

    for node in nodes {
        if !(node.block_type.is_control() && node.block_type.name() == "loop") {
            continue;
        }
        let body = collect_loop_body(&node.id, edges, &in_scope);
        for member in &body {
            all_body_nodes.insert(member.clone());
        }
        body_of.insert(node.id.clone(), body);
    }

    // A body node fed from outside its loop (or targeted by the loop's
    // `complete` edge) means the body leaks into the main graph.
    for (loop_id, body) in &body_of {
        for edge in edges {
            let source_outside = &edge.source != loop_id && !body.contains(&edge.source);
            let enters_body = body.contains(&edge.target);
            if enters_body && source_outside {
                errors.push(CompileError::LoopBodyEscape {
                    edge_id: edge.id.clone(),
                    loop_id: loop_id.clone(),
                });
            }
            if &edge.source == loop_id && edge.source_handle == "complete" && enters_body {
                errors.push(CompileError::LoopBodyEscape {
                    edge_id: edge.id.clone(),
                    loop_id: loop_id.clone(),
                });
            }
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    // The outer scope: everything not swallowed by a loop body.
    let scope_nodes: Vec<&NodeDocument> = nodes
        .iter()
        .filter(|n| !all_body_nodes.contains(&n.id))
        .copied()
        .collect();
    let scope_edges: Vec<&EdgeDocument> = edges
        .iter()
        .filter(|e| {
            !all_body_nodes.contains(&e.source) && !all_body_nodes.contains(&e.target)
        })
        .copied()
        .collect();

    let graph = DependencyGraph::new(
        scope_nodes.iter().map(|n| &n.id),
        scope_edges.iter().map(|e| (&e.source, &e.target)),
    );

    if let Err(stuck) = graph.check_acyclic() {
        return Err(vec![CompileError::CycleDetected { nodes: stuck }]);
    }

    let levels = graph.levels();
    let execution_order = graph.level_bands();
    let entry_points = graph.entry_nodes();
    let exit_points = graph.exit_nodes();

    // Assemble nodes in id-ascending order for deterministic output.
    let mut sorted_nodes: Vec<&NodeDocument> = scope_nodes.clone();
    sorted_nodes.sort_by(|a, b| a.id.cmp(&b.id));

    let mut compiled = IndexMap::new();
    for node in sorted_nodes {
        let mut dependencies = BTreeSet::new();
        let mut inputs = Vec::new();
        let mut outputs: BTreeMap<Handle, Vec<NodeId>> = BTreeMap::new();
        for edge in &scope_edges {
            if edge.target == node.id {
                dependencies.insert(edge.source.clone());
                inputs.push((edge.source.clone(), edge.source_handle.clone()));
            }
            if edge.source == node.id {
                outputs
                    .entry(edge.source_handle.clone())
                    .or_default()
                    .push(edge.target.clone());
            }
        }
        inputs.sort();
        for targets in outputs.values_mut() {
            targets.sort();
        }

        let body = match body_of.get(&node.id) {
            Some(body_ids) => {
                let body_nodes: Vec<&NodeDocument> = {
                    let mut v: Vec<&NodeDocument> = nodes
                        .iter()
                        .filter(|n| body_ids.contains(&n.id))
                        .copied()
                        .collect();
                    v.sort_by(|a, b| a.id.cmp(&b.id));
                    v
                };
                let body_edges: Vec<&EdgeDocument> = edges
                    .iter()
                    .filter(|e| body_ids.contains(&e.source) && body_ids.contains(&e.target))
                    .copied()
                    .collect();
                let body_dag = compile_scope(&body_nodes, &body_edges, warnings)?;
                Some(Box::new(body_dag))
            }
            None => None,
        };

        compiled.insert(
            node.id.clone(),
            CompiledNode {
                id: node.id.clone(),
                block_type: node.block_type.clone(),
                config: node.config.clone(),
                dependencies,
                inputs,
                outputs,
                level: levels.get(&node.id).copied().unwrap_or(0),
                body,
            },
        );
    }

    warn_conflicting_writes(&compiled, &execution_order, warnings);

    Ok(CompiledDag {
        nodes: compiled,
        execution_order,
        entry_points,
        exit_points,
    })
}

/// Body membership: everything reachable from the loop's `iteration` edge
/// targets, never traversing through the loop node itself. Edges from body
/// nodes back to the loop node are the declared back-edges.
fn collect_loop_body(
    loop_id: &NodeId,
    edges: &[&EdgeDocument],
    in_scope: &HashSet<&NodeId>,
) -> BTreeSet<NodeId> {
    let mut body = BTreeSet::new();
    let mut stack: Vec<NodeId> = edges
        .iter()
        .filter(|e| &e.source == loop_id && e.source_handle == "iteration")
        .map(|e| e.target.clone())
        .collect();

    while let Some(current) = stack.pop() {
        if &current == loop_id || !in_scope.contains(&current) {
            continue;
        }
        if !body.insert(current.clone()) {
            continue;
        }
        for edge in edges {
            if edge.source == current && &edge.target != loop_id {
                stack.push(edge.target.clone());
            }
        }
    }
    body
}

/// Warn when two `variable_set` nodes in the same band write the same
/// (literal) variable name — the resulting value is unspecified.
fn warn_conflicting_writes(
    nodes: &IndexMap<NodeId, CompiledNode>,
    execution_order: &[Vec<NodeId>],
    warnings: &mut Vec<CompileWarning>,
) {
    for band in execution_order {
        let mut writers: BTreeMap<&str, Vec<NodeId>> = BTreeMap::new();
        for node_id in band {
            let Some(node) = nodes.get(node_id) else {
                continue;
            };
            if node.block_type.is_control() && node.block_type.name() == "variable_set" {
                if let Some(name) = node.config.get("name").and_then(Value::as_str) {
                    // Templated names cannot be compared statically.
                    if !name.contains("{{") {
                        writers.entry(name).or_default().push(node_id.clone());
                    }
                }
            }
        }
        for (variable, mut ids) in writers {
            if ids.len() > 1 {
                ids.sort();
                warnings.push(CompileWarning::ConflictingVariableWrites {
                    variable: variable.to_string(),
                    nodes: ids,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::WorkflowDocument;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    /// Catalog with a couple of plain one-in/one-out network blocks.
    struct TestCatalog;

    impl BlockCatalog for TestCatalog {
        fn descriptor(&self, block_type: &opsflow_core::BlockType) -> Option<BlockDescriptor> {
            match block_type.as_str() {
                "traffic.ping" | "remote.ssh_exec" | "scan.port_scan" => {
                    Some(BlockDescriptor::new().input("in", true).output("out"))
                }
                _ => None,
            }
        }
    }

    fn nid(s: &str) -> NodeId {
        NodeId::new(s).unwrap()
    }

    fn doc(value: Value) -> WorkflowDocument {
        let mut base = json!({
            "id": "550e8400-e29b-41d4-a716-446655440000",
            "name": "test"
        });
        base.as_object_mut()
            .unwrap()
            .extend(value.as_object().unwrap().clone());
        serde_json::from_value(base).unwrap()
    }

    fn node(id: &str, block_type: &str) -> Value {
        json!({"id": id, "type": block_type, "config": {}})
    }

    fn edge(id: &str, source: &str, sh: &str, target: &str, th: &str) -> Value {
        json!({"id": id, "source": source, "source_handle": sh,
               "target": target, "target_handle": th})
    }

    fn linear_doc() -> WorkflowDocument {
        doc(json!({
            "nodes": [
                node("start", "control.start"),
                node("ping", "traffic.ping"),
                node("end", "control.end"),
            ],
            "edges": [
                edge("e1", "start", "out", "ping", "in"),
                edge("e2", "ping", "out", "end", "in"),
            ]
        }))
    }

    #[test]
    fn compiles_linear_workflow() {
        let result = compile(&linear_doc(), &TestCatalog);
        assert!(result.is_valid, "errors: {:?}", result.errors);
        let dag = result.dag.unwrap();
        assert_eq!(dag.execution_order, vec![
            vec![nid("start")],
            vec![nid("ping")],
            vec![nid("end")],
        ]);
        assert_eq!(dag.entry_points, vec![nid("start")]);
        assert_eq!(dag.exit_points, vec![nid("end")]);

        let ping = dag.node(&nid("ping")).unwrap();
        assert_eq!(ping.level, 1);
        assert_eq!(ping.dependencies, BTreeSet::from([nid("start")]));
        assert_eq!(ping.outputs["out"], vec![nid("end")]);
        assert_eq!(ping.inputs, vec![(nid("start"), "out".to_string())]);
    }

    #[test]
    fn compilation_is_deterministic() {
        let d = linear_doc();
        let a = compile(&d, &TestCatalog);
        let b = compile(&d, &TestCatalog);
        assert_eq!(a.dag, b.dag);
        assert_eq!(a.errors, b.errors);
        assert_eq!(a.warnings, b.warnings);
    }

    #[test]
    fn empty_workflow_is_fatal() {
        let result = compile(&doc(json!({"nodes": [], "edges": []})), &TestCatalog);
        assert!(!result.is_valid);
        assert!(result.errors.contains(&CompileError::EmptyWorkflow));
        assert!(result.dag.is_none());
    }

    #[test]
    fn duplicate_node_id_is_fatal() {
        let result = compile(
            &doc(json!({"nodes": [node("a", "control.start"), node("a", "control.end")]})),
            &TestCatalog,
        );
        assert!(!result.is_valid);
        assert!(matches!(
            result.errors[0],
            CompileError::DuplicateNodeId { .. }
        ));
    }

    #[test]
    fn dangling_edge_is_fatal() {
        let result = compile(
            &doc(json!({
                "nodes": [node("a", "control.start")],
                "edges": [edge("e1", "a", "out", "ghost", "in")]
            })),
            &TestCatalog,
        );
        assert!(!result.is_valid);
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, CompileError::DanglingEdge { node_id, .. } if node_id == "ghost")));
    }

    #[test]
    fn unknown_block_type_is_fatal() {
        let result = compile(
            &doc(json!({"nodes": [node("x", "alien.block")]})),
            &TestCatalog,
        );
        assert!(!result.is_valid);
        assert!(matches!(
            result.errors[0],
            CompileError::UnknownBlockType { .. }
        ));
    }

    #[test]
    fn invalid_handle_is_fatal() {
        let result = compile(
            &doc(json!({
                "nodes": [node("c", "control.condition"), node("e", "control.end")],
                "edges": [edge("e1", "c", "maybe", "e", "in")]
            })),
            &TestCatalog,
        );
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| matches!(
            e,
            CompileError::InvalidHandle { handle, .. } if handle == "maybe"
        )));
    }

    #[test]
    fn template_syntax_error_is_fatal() {
        let result = compile(
            &doc(json!({
                "nodes": [{"id": "p", "type": "traffic.ping",
                           "config": {"host": "{{ $vars.host"}}]
            })),
            &TestCatalog,
        );
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| matches!(
            e,
            CompileError::TemplateSyntax { parameter, .. } if parameter == "host"
        )));
    }

    #[test]
    fn template_check_descends_into_nested_values() {
        let result = compile(
            &doc(json!({
                "nodes": [{"id": "p", "type": "traffic.ping",
                           "config": {"targets": ["ok", "{{ bad("]}}]
            })),
            &TestCatalog,
        );
        assert!(!result.is_valid);
    }

    #[test]
    fn cycle_is_fatal_and_reports_participants() {
        let result = compile(
            &doc(json!({
                "nodes": [
                    node("start", "control.start"),
                    node("a", "traffic.ping"),
                    node("b", "traffic.ping"),
                ],
                "edges": [
                    edge("e1", "start", "out", "a", "in"),
                    edge("e2", "a", "out", "b", "in"),
                    edge("e3", "b", "out", "a", "in"),
                ]
            })),
            &TestCatalog,
        );
        assert!(!result.is_valid);
        let CompileError::CycleDetected { nodes } = &result.errors[0] else {
            panic!("expected cycle error, got {:?}", result.errors);
        };
        assert_eq!(nodes, &vec![nid("a"), nid("b")]);
    }

    #[test]
    fn invalid_parallel_limit_is_fatal() {
        let result = compile(
            &doc(json!({
                "nodes": [node("start", "control.start")],
                "settings": {"parallel_limit": 0}
            })),
            &TestCatalog,
        );
        assert!(!result.is_valid);
        assert!(matches!(
            result.errors[0],
            CompileError::InvalidSettings { .. }
        ));
    }

    fn loop_doc() -> WorkflowDocument {
        doc(json!({
            "nodes": [
                node("start", "control.start"),
                {"id": "each", "type": "control.loop",
                 "config": {"mode": "array", "array": "{{ $vars.hosts }}", "variable_name": "h"}},
                {"id": "ping", "type": "traffic.ping", "config": {"host": "{{ $vars.h }}"}},
                node("end", "control.end"),
            ],
            "edges": [
                edge("e1", "start", "out", "each", "in"),
                edge("e2", "each", "iteration", "ping", "in"),
                edge("e3", "ping", "out", "each", "in"),
                edge("e4", "each", "complete", "end", "in"),
            ]
        }))
    }

    #[test]
    fn loop_body_desugars_into_nested_dag() {
        let result = compile(&loop_doc(), &TestCatalog);
        assert!(result.is_valid, "errors: {:?}", result.errors);
        let dag = result.dag.unwrap();

        // Outer scope: start → each → end; the ping node lives in the body.
        assert_eq!(dag.execution_order, vec![
            vec![nid("start")],
            vec![nid("each")],
            vec![nid("end")],
        ]);
        let each = dag.node(&nid("each")).unwrap();
        let body = each.body.as_ref().unwrap();
        assert_eq!(body.execution_order, vec![vec![nid("ping")]]);
        assert_eq!(body.entry_points, vec![nid("ping")]);
        // The back-edge (ping → each) is gone from both scopes.
        assert!(body.node(&nid("ping")).unwrap().outputs.is_empty());
        assert_eq!(dag.total_nodes(), 4);
    }

    #[test]
    fn loop_body_fed_from_outside_is_fatal() {
        let mut d = loop_doc();
        d.edges.push(serde_json::from_value(
            edge("e5", "start", "out", "ping", "in")
        ).unwrap());
        let result = compile(&d, &TestCatalog);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| matches!(
            e,
            CompileError::LoopBodyEscape { edge_id, .. } if edge_id == "e5"
        )));
    }

    #[test]
    fn nested_loops_compile() {
        let result = compile(
            &doc(json!({
                "nodes": [
                    node("start", "control.start"),
                    {"id": "outer", "type": "control.loop", "config": {"mode": "count", "count": 2}},
                    {"id": "inner", "type": "control.loop", "config": {"mode": "count", "count": 3}},
                    node("ping", "traffic.ping"),
                    node("end", "control.end"),
                ],
                "edges": [
                    edge("e1", "start", "out", "outer", "in"),
                    edge("e2", "outer", "iteration", "inner", "in"),
                    edge("e3", "inner", "iteration", "ping", "in"),
                    edge("e4", "ping", "out", "inner", "in"),
                    edge("e5", "inner", "complete", "outer", "in"),
                    edge("e6", "outer", "complete", "end", "in"),
                ]
            })),
            &TestCatalog,
        );
        assert!(result.is_valid, "errors: {:?}", result.errors);
        let dag = result.dag.unwrap();
        let outer = dag.node(&nid("outer")).unwrap();
        let outer_body = outer.body.as_ref().unwrap();
        let inner = outer_body.node(&nid("inner")).unwrap();
        let inner_body = inner.body.as_ref().unwrap();
        assert!(inner_body.node(&nid("ping")).is_some());
        assert_eq!(dag.total_nodes(), 5);
    }

    #[test]
    fn unreachable_node_warns_but_compiles() {
        let mut d = linear_doc();
        d.nodes
            .push(serde_json::from_value(node("island", "traffic.ping")).unwrap());
        let result = compile(&d, &TestCatalog);
        assert!(result.is_valid);
        assert!(result.warnings.iter().any(|w| matches!(
            w,
            CompileWarning::UnreachableNode { node_id } if node_id == "island"
        )));
    }

    #[test]
    fn unconnected_required_input_warns() {
        let result = compile(
            &doc(json!({
                "nodes": [node("start", "control.start"), node("end", "control.end")],
                "edges": []
            })),
            &TestCatalog,
        );
        assert!(result.is_valid);
        assert!(result.warnings.iter().any(|w| matches!(
            w,
            CompileWarning::UnconnectedRequiredInput { node_id, handle }
                if node_id == "end" && handle == "in"
        )));
    }

    #[test]
    fn conflicting_variable_writes_warn() {
        let result = compile(
            &doc(json!({
                "nodes": [
                    node("start", "control.start"),
                    {"id": "set_a", "type": "control.variable_set",
                     "config": {"name": "x", "value": "1"}},
                    {"id": "set_b", "type": "control.variable_set",
                     "config": {"name": "x", "value": "2"}},
                ],
                "edges": [
                    edge("e1", "start", "out", "set_a", "in"),
                    edge("e2", "start", "out", "set_b", "in"),
                ]
            })),
            &TestCatalog,
        );
        assert!(result.is_valid);
        assert!(result.warnings.iter().any(|w| matches!(
            w,
            CompileWarning::ConflictingVariableWrites { variable, nodes }
                if variable == "x" && nodes.len() == 2
        )));
    }

    #[test]
    fn condition_branches_share_a_band() {
        let result = compile(
            &doc(json!({
                "nodes": [
                    node("start", "control.start"),
                    {"id": "cond", "type": "control.condition",
                     "config": {"expression": "{{ $vars.x > 1 }}"}},
                    node("hi", "traffic.ping"),
                    node("lo", "traffic.ping"),
                ],
                "edges": [
                    edge("e1", "start", "out", "cond", "in"),
                    edge("e2", "cond", "true", "hi", "in"),
                    edge("e3", "cond", "false", "lo", "in"),
                ]
            })),
            &TestCatalog,
        );
        assert!(result.is_valid, "errors: {:?}", result.errors);
        let dag = result.dag.unwrap();
        assert_eq!(dag.execution_order[2], vec![nid("hi"), nid("lo")]);
        let cond = dag.node(&nid("cond")).unwrap();
        assert_eq!(cond.outputs["true"], vec![nid("hi")]);
        assert_eq!(cond.outputs["false"], vec![nid("lo")]);
    }
}
