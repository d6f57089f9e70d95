//! Provenance graphs over data objects.
//!
//! Nodes are run outputs, edges come from stored relations of one name.
//! Relations whose endpoints are no longer outputs of any run are logged
//! and dropped.

use indexmap::{IndexMap, IndexSet};
use runweave_core::ObjectId;
use runweave_storage::{RelationIndex, Store, StoreResult};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Node of an object graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectNode {
    /// Data object id
    pub object_id: ObjectId,
    /// `<run label>.<output name>`
    pub label: String,
    /// Upstream objects
    pub parents: IndexSet<ObjectId>,
    /// Downstream objects
    pub children: IndexSet<ObjectId>,
}

/// Graph of data objects linked by one relation kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectGraph {
    /// Relation name the graph was built from
    pub relation: String,
    /// Objects without parents
    pub roots: IndexSet<ObjectId>,
    nodes: IndexMap<ObjectId, ObjectNode>,
}

impl ObjectGraph {
    /// Node of an object
    #[must_use]
    pub fn node(&self, id: ObjectId) -> Option<&ObjectNode> {
        self.nodes.get(&id)
    }

    /// All nodes
    pub fn nodes(&self) -> impl Iterator<Item = &ObjectNode> {
        self.nodes.values()
    }

    /// Number of nodes
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Oldest ancestor of `id` below the roots, following first parents
    #[must_use]
    pub fn oldest_ancestor(&self, id: ObjectId) -> Option<ObjectId> {
        let mut current = self.nodes.get(&id)?;
        let mut seen: IndexSet<ObjectId> = IndexSet::new();
        seen.insert(current.object_id);
        while let Some(parent) = current.parents.first() {
            if !seen.insert(*parent) {
                break;
            }
            match self.nodes.get(parent) {
                Some(node) => current = node,
                None => break,
            }
        }
        Some(current.object_id)
    }

    /// `id`'s oldest ancestor and everything below it
    #[must_use]
    pub fn connected_objects(&self, id: ObjectId) -> IndexSet<ObjectId> {
        let mut out = IndexSet::new();
        let Some(start) = self.oldest_ancestor(id) else {
            return out;
        };
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            if !out.insert(current) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }
}

/// Build the graph of one relation kind over every run output
///
/// # Errors
///
/// Returns error if runs or relations cannot be read
pub fn build_relation_graph(store: &Store, relation: &str) -> StoreResult<ObjectGraph> {
    let mut graph = ObjectGraph {
        relation: relation.to_string(),
        ..ObjectGraph::default()
    };
    for run in store.runs()? {
        for (name, output) in &run.outputs {
            graph.nodes.insert(
                output.object_id,
                ObjectNode {
                    object_id: output.object_id,
                    label: format!("{}.{}", run.display_name(), name),
                    parents: IndexSet::new(),
                    children: IndexSet::new(),
                },
            );
        }
    }

    for rel in store.relations_of_kind(relation)? {
        if !graph.nodes.contains_key(&rel.parent_id) {
            warn!(relation, parent = %rel.parent_id, "Relation parent is not a run output, ignored");
            continue;
        }
        if !graph.nodes.contains_key(&rel.child_id) {
            warn!(relation, child = %rel.child_id, "Relation child is not a run output, ignored");
            continue;
        }
        if let Some(parent) = graph.nodes.get_mut(&rel.parent_id) {
            parent.children.insert(rel.child_id);
        }
        if let Some(child) = graph.nodes.get_mut(&rel.child_id) {
            child.parents.insert(rel.parent_id);
        }
    }

    graph.roots = graph
        .nodes
        .values()
        .filter(|n| n.parents.is_empty())
        .map(|n| n.object_id)
        .collect();
    Ok(graph)
}
