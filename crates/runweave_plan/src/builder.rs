//! Builds the runs graph from persisted runs.

use crate::dag::RunsGraph;
use runweave_core::{ObjectId, PointerResolver, Run};
use runweave_storage::{Store, StoreResult};
use std::collections::HashMap;
use tracing::debug;

/// Derives a [`RunsGraph`] by resolving every input pointer
pub struct GraphBuilder<'a> {
    resolver: &'a dyn PointerResolver,
}

impl<'a> GraphBuilder<'a> {
    /// Builder resolving through `resolver`
    #[must_use]
    pub fn new(resolver: &'a dyn PointerResolver) -> Self {
        Self { resolver }
    }

    /// Graph of every top-level run in the store
    ///
    /// # Errors
    ///
    /// Returns error if runs cannot be read
    pub fn from_store(store: &Store) -> StoreResult<RunsGraph> {
        let runs = store.runs()?;
        Ok(GraphBuilder::new(store).build(&runs))
    }

    /// Graph of the given runs; nested and unsaved runs are left out
    #[must_use]
    pub fn build(&self, runs: &[Run]) -> RunsGraph {
        let mut graph = RunsGraph::new();
        let mut owners: HashMap<ObjectId, ObjectId> = HashMap::new();

        let top: Vec<(ObjectId, &Run)> = runs
            .iter()
            .filter(|r| !r.is_child())
            .filter_map(|r| r.id.map(|id| (id, r)))
            .collect();

        for (id, run) in &top {
            graph.add_run(*id, run.display_name(), run.status);
            owners.insert(*id, *id);
            for output in run.output_ids() {
                owners.insert(output, *id);
            }
        }

        for (id, run) in &top {
            for (name, pointer) in run.pointers() {
                let Some(pointed) = self.resolver.resolve(pointer) else {
                    continue;
                };
                if self.link(&mut graph, &owners, pointed, *id) {
                    continue;
                }
                if let Some(parent) = self.resolver.parent_of(pointed) {
                    if !self.link(&mut graph, &owners, parent, *id) {
                        debug!(run = %id, input = name, object = %pointed, "Input has no producing run");
                    }
                }
            }
        }

        graph.attach_orphans_to_root();
        graph
    }

    /// Edge from the owner of `object` to `consumer`; true if `object` has an owner
    fn link(
        &self,
        graph: &mut RunsGraph,
        owners: &HashMap<ObjectId, ObjectId>,
        object: ObjectId,
        consumer: ObjectId,
    ) -> bool {
        match owners.get(&object) {
            Some(owner) => {
                graph.add_edge(*owner, consumer);
                true
            }
            None => false,
        }
    }
}
