//! Dependency graph of runs.
//!
//! Nodes are top-level runs; an edge `A -> B` means some input of `B`
//! resolves to `A` or to one of its outputs. Runs without producers hang
//! from a synthetic `PROJECT` root.

use indexmap::{IndexMap, IndexSet};
use runweave_core::{ObjectId, RunStatus};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::warn;

/// Label of the synthetic root node
pub const ROOT_LABEL: &str = "PROJECT";

/// A node of the runs graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Run id; `None` for the root
    pub run_id: Option<ObjectId>,
    /// Run label
    pub label: String,
    /// Run status at build time; `None` for the root
    pub status: Option<RunStatus>,
    /// Consumers
    pub children: IndexSet<ObjectId>,
    /// Producers
    pub parents: IndexSet<ObjectId>,
}

impl GraphNode {
    fn new(run_id: Option<ObjectId>, label: impl Into<String>, status: Option<RunStatus>) -> Self {
        Self {
            run_id,
            label: label.into(),
            status,
            children: IndexSet::new(),
            parents: IndexSet::new(),
        }
    }

    /// True for the synthetic root
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.run_id.is_none()
    }
}

/// Directed edge producer -> consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Producer run
    pub from: ObjectId,
    /// Consumer run
    pub to: ObjectId,
}

/// A run outside a candidate set that depends on a run inside it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Candidate run
    pub run: ObjectId,
    /// Its label
    pub run_label: String,
    /// Dependent run
    pub dependent: ObjectId,
    /// Its label
    pub dependent_label: String,
}

/// Runs dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunsGraph {
    root: GraphNode,
    nodes: IndexMap<ObjectId, GraphNode>,
}

impl RunsGraph {
    /// Create a graph holding only the root
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: GraphNode::new(None, ROOT_LABEL, None),
            nodes: IndexMap::new(),
        }
    }

    /// Add a run node; re-adding keeps the existing edges
    pub fn add_run(&mut self, id: ObjectId, label: impl Into<String>, status: RunStatus) {
        let label = label.into();
        self.nodes
            .entry(id)
            .and_modify(|n| {
                n.label.clone_from(&label);
                n.status = Some(status);
            })
            .or_insert_with(|| GraphNode::new(Some(id), label, Some(status)));
    }

    /// Add `from -> to`; returns false for self-loops, unknown nodes and duplicates
    pub fn add_edge(&mut self, from: ObjectId, to: ObjectId) -> bool {
        if from == to {
            let label = self.nodes.get(&from).map_or("?", |n| n.label.as_str());
            warn!(run = %from, label, "Run has a cyclic dependence to itself, edge skipped");
            return false;
        }
        if !self.nodes.contains_key(&from) || !self.nodes.contains_key(&to) {
            return false;
        }
        let added = self
            .nodes
            .get_mut(&from)
            .is_some_and(|n| n.children.insert(to));
        if let Some(n) = self.nodes.get_mut(&to) {
            n.parents.insert(from);
        }
        added
    }

    /// Hang every node without parents from the root
    pub fn attach_orphans_to_root(&mut self) {
        self.root.children = self
            .nodes
            .iter()
            .filter(|(_, n)| n.parents.is_empty())
            .map(|(id, _)| *id)
            .collect();
    }

    /// The synthetic root
    #[must_use]
    pub fn root(&self) -> &GraphNode {
        &self.root
    }

    /// Node of a run
    #[must_use]
    pub fn node(&self, id: ObjectId) -> Option<&GraphNode> {
        self.nodes.get(&id)
    }

    /// All run nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    /// Consumers of a run
    #[must_use]
    pub fn children_of(&self, id: ObjectId) -> Vec<ObjectId> {
        self.nodes
            .get(&id)
            .map(|n| n.children.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Producers of a run
    #[must_use]
    pub fn parents_of(&self, id: ObjectId) -> Vec<ObjectId> {
        self.nodes
            .get(&id)
            .map(|n| n.parents.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every run reachable by walking parents up to the root, nearest first
    #[must_use]
    pub fn ancestors_of(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut seen: IndexSet<ObjectId> = IndexSet::new();
        let mut queue: VecDeque<ObjectId> = self.parents_of(id).into();
        while let Some(current) = queue.pop_front() {
            if current == id || !seen.insert(current) {
                continue;
            }
            queue.extend(self.parents_of(current));
        }
        seen.into_iter().collect()
    }

    /// Every run reachable through children, nearest first
    #[must_use]
    pub fn descendants_of(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut seen: IndexSet<ObjectId> = IndexSet::new();
        let mut queue: VecDeque<ObjectId> = self.children_of(id).into();
        while let Some(current) = queue.pop_front() {
            if current == id || !seen.insert(current) {
                continue;
            }
            queue.extend(self.children_of(current));
        }
        seen.into_iter().collect()
    }

    /// All edges in node order
    #[must_use]
    pub fn edges(&self) -> Vec<Edge> {
        self.nodes
            .iter()
            .flat_map(|(from, n)| n.children.iter().map(|to| Edge { from: *from, to: *to }))
            .collect()
    }

    /// Number of run nodes
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(|n| n.children.len()).sum()
    }

    /// True when there are no runs
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Non-saved runs outside `candidates` that consume a run inside it
    #[must_use]
    pub fn dependents_outside(&self, candidates: &[ObjectId]) -> Vec<Dependency> {
        let mut out = Vec::new();
        for id in candidates {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            for child in &node.children {
                if candidates.contains(child) {
                    continue;
                }
                let Some(child_node) = self.nodes.get(child) else {
                    continue;
                };
                if child_node.status == Some(RunStatus::Saved) {
                    continue;
                }
                out.push(Dependency {
                    run: *id,
                    run_label: node.label.clone(),
                    dependent: *child,
                    dependent_label: child_node.label.clone(),
                });
            }
        }
        out
    }

    /// True when deleting `candidates` leaves no active dependent behind
    #[must_use]
    pub fn is_safe_to_remove(&self, candidates: &[ObjectId]) -> bool {
        self.dependents_outside(candidates).is_empty()
    }

    /// A cycle as a path of run ids, first node repeated at the end
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<ObjectId>> {
        let mut visited: IndexSet<ObjectId> = IndexSet::new();
        let mut stack: IndexSet<ObjectId> = IndexSet::new();
        for &id in self.nodes.keys() {
            if let Some(cycle) = self.dfs_cycle(id, &mut visited, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs_cycle(
        &self,
        id: ObjectId,
        visited: &mut IndexSet<ObjectId>,
        stack: &mut IndexSet<ObjectId>,
    ) -> Option<Vec<ObjectId>> {
        if let Some(pos) = stack.get_index_of(&id) {
            let mut cycle: Vec<ObjectId> = stack.iter().skip(pos).copied().collect();
            cycle.push(id);
            return Some(cycle);
        }
        if !visited.insert(id) {
            return None;
        }
        stack.insert(id);
        for child in self.children_of(id) {
            if let Some(cycle) = self.dfs_cycle(child, visited, stack) {
                return Some(cycle);
            }
        }
        stack.pop();
        None
    }
}

impl Default for RunsGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> ObjectId {
        ObjectId::from_raw(n)
    }

    fn chain(statuses: &[RunStatus]) -> RunsGraph {
        let mut g = RunsGraph::new();
        for (i, s) in statuses.iter().enumerate() {
            g.add_run(id(i as u64 + 1), format!("run {}", i + 1), *s);
        }
        for i in 1..statuses.len() as u64 {
            g.add_edge(id(i), id(i + 1));
        }
        g.attach_orphans_to_root();
        g
    }

    #[test]
    fn test_root_children_are_orphans() {
        let g = chain(&[RunStatus::Finished, RunStatus::Finished]);
        assert_eq!(g.root().label, ROOT_LABEL);
        assert!(g.root().is_root());
        assert_eq!(g.root().children.iter().copied().collect::<Vec<_>>(), vec![id(1)]);
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn test_self_loop_skipped() {
        let mut g = RunsGraph::new();
        g.add_run(id(1), "a", RunStatus::Saved);
        assert!(!g.add_edge(id(1), id(1)));
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn test_duplicate_edge_ignored() {
        let mut g = chain(&[RunStatus::Saved, RunStatus::Saved]);
        assert!(!g.add_edge(id(1), id(2)));
        assert_eq!(g.edges(), vec![Edge { from: id(1), to: id(2) }]);
    }

    #[test]
    fn test_ancestors_and_descendants() {
        let g = chain(&[RunStatus::Finished, RunStatus::Finished, RunStatus::Finished]);
        assert_eq!(g.ancestors_of(id(3)), vec![id(2), id(1)]);
        assert_eq!(g.descendants_of(id(1)), vec![id(2), id(3)]);
        assert!(g.ancestors_of(id(1)).is_empty());
    }

    #[test]
    fn test_dependents_outside_ignores_saved() {
        let g = chain(&[RunStatus::Finished, RunStatus::Saved]);
        assert!(g.is_safe_to_remove(&[id(1)]));

        let g = chain(&[RunStatus::Finished, RunStatus::Finished]);
        let deps = g.dependents_outside(&[id(1)]);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].dependent, id(2));
        assert_eq!(deps[0].dependent_label, "run 2");
        assert!(g.is_safe_to_remove(&[id(1), id(2)]));
    }

    #[test]
    fn test_find_cycle() {
        let mut g = chain(&[RunStatus::Saved, RunStatus::Saved, RunStatus::Saved]);
        assert!(g.find_cycle().is_none());
        g.add_edge(id(3), id(1));
        let cycle = g.find_cycle().unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
    }
}
