//! Dependency graph over workflow nodes.
//!
//! A thin layer over [`petgraph`] keyed by [`NodeId`]. The compiler builds
//! one graph per scope (the outer workflow, and each loop body) after
//! removing declared loop back-edges, then runs cycle detection and level
//! assignment on it.

use std::collections::{BTreeSet, HashMap};

use opsflow_core::NodeId;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

/// Directed dependency graph for one compilation scope.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<NodeId, ()>,
    index: HashMap<NodeId, NodeIndex>,
}

impl DependencyGraph {
    /// Build a graph from a node set and `(source, target)` dependency
    /// pairs. Parallel edges between the same pair collapse to one
    /// dependency. Edges referencing unknown nodes are ignored; the
    /// compiler has already rejected dangling references.
    #[must_use]
    pub fn new<'a>(
        nodes: impl IntoIterator<Item = &'a NodeId>,
        edges: impl IntoIterator<Item = (&'a NodeId, &'a NodeId)>,
    ) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for node in nodes {
            let idx = graph.add_node(node.clone());
            index.insert(node.clone(), idx);
        }
        let mut seen: BTreeSet<(NodeIndex, NodeIndex)> = BTreeSet::new();
        for (source, target) in edges {
            if let (Some(&s), Some(&t)) = (index.get(source), index.get(target)) {
                if seen.insert((s, t)) {
                    graph.add_edge(s, t, ());
                }
            }
        }
        Self { graph, index }
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Direct predecessors of a node, sorted by id.
    #[must_use]
    pub fn predecessors(&self, node: &NodeId) -> Vec<NodeId> {
        let Some(&idx) = self.index.get(node) else {
            return Vec::new();
        };
        let mut preds: Vec<NodeId> = self
            .graph
            .edges_directed(idx, petgraph::Direction::Incoming)
            .map(|e| self.graph[e.source()].clone())
            .collect();
        preds.sort();
        preds
    }

    /// Direct successors of a node, sorted by id.
    #[must_use]
    pub fn successors(&self, node: &NodeId) -> Vec<NodeId> {
        let Some(&idx) = self.index.get(node) else {
            return Vec::new();
        };
        let mut succs: Vec<NodeId> = self
            .graph
            .edges_directed(idx, petgraph::Direction::Outgoing)
            .map(|e| self.graph[e.target()].clone())
            .collect();
        succs.sort();
        succs
    }

    /// Nodes with no incoming edges, sorted by id.
    #[must_use]
    pub fn entry_nodes(&self) -> Vec<NodeId> {
        let mut entries: Vec<NodeId> = self
            .graph
            .node_indices()
            .filter(|&i| {
                self.graph
                    .edges_directed(i, petgraph::Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|i| self.graph[i].clone())
            .collect();
        entries.sort();
        entries
    }

    /// Nodes with no outgoing edges, sorted by id.
    #[must_use]
    pub fn exit_nodes(&self) -> Vec<NodeId> {
        let mut exits: Vec<NodeId> = self
            .graph
            .node_indices()
            .filter(|&i| {
                self.graph
                    .edges_directed(i, petgraph::Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .map(|i| self.graph[i].clone())
            .collect();
        exits.sort();
        exits
    }

    /// Run Kahn's algorithm. `Ok(())` when the graph is acyclic; otherwise
    /// the sorted list of every node still holding in-degree > 0 when the
    /// algorithm stalled — the nodes participating in (or downstream of) a
    /// cycle.
    pub fn check_acyclic(&self) -> Result<(), Vec<NodeId>> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|i| {
                (
                    i,
                    self.graph
                        .edges_directed(i, petgraph::Direction::Incoming)
                        .count(),
                )
            })
            .collect();

        let mut queue: Vec<NodeIndex> = in_degree
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(&i, _)| i)
            .collect();
        let mut removed = 0usize;

        while let Some(idx) = queue.pop() {
            removed += 1;
            for edge in self.graph.edges_directed(idx, petgraph::Direction::Outgoing) {
                let target = edge.target();
                if let Some(d) = in_degree.get_mut(&target) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push(target);
                    }
                }
            }
        }

        if removed == self.graph.node_count() {
            Ok(())
        } else {
            let mut stuck: Vec<NodeId> = in_degree
                .iter()
                .filter(|&(_, &d)| d > 0)
                .map(|(&i, _)| self.graph[i].clone())
                .collect();
            stuck.sort();
            Err(stuck)
        }
    }

    /// Compute the dependency level of every node:
    /// `level(n) = 0` without predecessors, else `1 + max(level(pred))`.
    ///
    /// Caller must have verified acyclicity first.
    #[must_use]
    pub fn levels(&self) -> HashMap<NodeId, usize> {
        let mut memo: HashMap<NodeIndex, usize> = HashMap::new();
        let mut result = HashMap::new();
        for idx in self.graph.node_indices() {
            let level = self.level_of(idx, &mut memo);
            result.insert(self.graph[idx].clone(), level);
        }
        result
    }

    fn level_of(&self, idx: NodeIndex, memo: &mut HashMap<NodeIndex, usize>) -> usize {
        if let Some(&lvl) = memo.get(&idx) {
            return lvl;
        }
        let level = self
            .graph
            .edges_directed(idx, petgraph::Direction::Incoming)
            .map(|e| e.source())
            .collect::<Vec<_>>()
            .into_iter()
            .map(|pred| self.level_of(pred, memo) + 1)
            .max()
            .unwrap_or(0);
        memo.insert(idx, level);
        level
    }

    /// Group nodes into level bands, node ids ascending within each band.
    #[must_use]
    pub fn level_bands(&self) -> Vec<Vec<NodeId>> {
        let levels = self.levels();
        let max_level = levels.values().copied().max().unwrap_or(0);
        let mut bands: Vec<Vec<NodeId>> = vec![Vec::new(); if levels.is_empty() { 0 } else { max_level + 1 }];
        for (node, level) in levels {
            bands[level].push(node);
        }
        for band in &mut bands {
            band.sort();
        }
        bands
    }

    /// All nodes reachable from the given starting set (inclusive).
    #[must_use]
    pub fn reachable_from(&self, starts: &[NodeId]) -> BTreeSet<NodeId> {
        let mut visited: BTreeSet<NodeIndex> = BTreeSet::new();
        let mut stack: Vec<NodeIndex> = starts
            .iter()
            .filter_map(|n| self.index.get(n).copied())
            .collect();
        while let Some(idx) = stack.pop() {
            if !visited.insert(idx) {
                continue;
            }
            for edge in self.graph.edges_directed(idx, petgraph::Direction::Outgoing) {
                stack.push(edge.target());
            }
        }
        visited.into_iter().map(|i| self.graph[i].clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn nid(s: &str) -> NodeId {
        NodeId::new(s).unwrap()
    }

    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> DependencyGraph {
        let nodes: Vec<NodeId> = nodes.iter().map(|s| nid(s)).collect();
        let edges: Vec<(NodeId, NodeId)> =
            edges.iter().map(|(s, t)| (nid(s), nid(t))).collect();
        DependencyGraph::new(
            nodes.iter(),
            edges.iter().map(|(s, t)| (s, t)),
        )
    }

    #[test]
    fn linear_levels() {
        let g = graph(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        assert!(g.check_acyclic().is_ok());
        assert_eq!(g.level_bands(), vec![
            vec![nid("a")],
            vec![nid("b")],
            vec![nid("c")],
        ]);
        assert_eq!(g.entry_nodes(), vec![nid("a")]);
        assert_eq!(g.exit_nodes(), vec![nid("c")]);
    }

    #[test]
    fn diamond_levels() {
        let g = graph(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );
        let bands = g.level_bands();
        assert_eq!(bands.len(), 3);
        assert_eq!(bands[1], vec![nid("b"), nid("c")]);
        assert_eq!(g.predecessors(&nid("d")), vec![nid("b"), nid("c")]);
    }

    #[test]
    fn unbalanced_diamond_uses_max_predecessor_level() {
        // a → b → c → e, a → d → e: e sits at level 3, not 2.
        let g = graph(
            &["a", "b", "c", "d", "e"],
            &[("a", "b"), ("b", "c"), ("a", "d"), ("c", "e"), ("d", "e")],
        );
        let levels = g.levels();
        assert_eq!(levels[&nid("e")], 3);
        assert_eq!(levels[&nid("d")], 1);
    }

    #[test]
    fn cycle_reports_stuck_nodes() {
        let g = graph(&["a", "b", "c"], &[("a", "b"), ("b", "c"), ("c", "b")]);
        let stuck = g.check_acyclic().unwrap_err();
        assert_eq!(stuck, vec![nid("b"), nid("c")]);
    }

    #[test]
    fn self_edge_is_a_cycle() {
        let g = graph(&["a"], &[("a", "a")]);
        assert!(g.check_acyclic().is_err());
    }

    #[test]
    fn parallel_edges_collapse() {
        let g = graph(&["a", "b"], &[("a", "b"), ("a", "b")]);
        assert_eq!(g.predecessors(&nid("b")), vec![nid("a")]);
        assert_eq!(g.levels()[&nid("b")], 1);
    }

    #[test]
    fn reachability() {
        let g = graph(&["a", "b", "island"], &[("a", "b")]);
        let reached = g.reachable_from(&[nid("a")]);
        assert!(reached.contains(&nid("a")));
        assert!(reached.contains(&nid("b")));
        assert!(!reached.contains(&nid("island")));
    }

    #[test]
    fn band_order_is_id_ascending() {
        let g = graph(&["z", "m", "a"], &[]);
        assert_eq!(g.level_bands(), vec![vec![nid("a"), nid("m"), nid("z")]]);
    }

    #[test]
    fn empty_graph() {
        let g = graph(&[], &[]);
        assert!(g.check_acyclic().is_ok());
        assert!(g.level_bands().is_empty());
        assert!(g.entry_nodes().is_empty());
    }
}
