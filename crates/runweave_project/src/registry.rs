//! Run registry: durable run records on top of the entity store.

use crate::error::{ProjectError, ProjectResult};
use crate::paths::RUNS_DIR;
use runweave_core::{Entity, EntityKind, ObjectId, Run};
use runweave_storage::{RelationIndex, Store, StoreError};
use std::path::PathBuf;
use tracing::debug;

/// Persisted runs of a project
#[derive(Debug)]
pub struct RunRegistry {
    store: Store,
}

impl RunRegistry {
    /// Registry over a store
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Underlying store
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Underlying store, mutably
    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    /// First persist: assign id and working directory
    ///
    /// # Errors
    ///
    /// Returns error if the run cannot be staged
    pub fn setup(&mut self, run: &mut Run) -> ProjectResult<ObjectId> {
        let id = self.store.put_run(run)?;
        run.working_dir = Some(PathBuf::from(RUNS_DIR).join(run.working_dir_name(id)));
        self.store.put_run(run)?;
        debug!(run = %id, kind = %run.kind, "Run registered");
        Ok(id)
    }

    /// Stage an update of a persisted run, or set it up if new
    ///
    /// # Errors
    ///
    /// Returns error if the run cannot be staged
    pub fn store_run(&mut self, run: &mut Run) -> ProjectResult<ObjectId> {
        if run.id.is_none() {
            return self.setup(run);
        }
        run.updated_at = runweave_core::Timestamp::now();
        Ok(self.store.put_run(run)?)
    }

    /// Run by id
    ///
    /// # Errors
    ///
    /// Returns `InvalidRun` if the id is not a run
    pub fn get(&self, id: ObjectId) -> ProjectResult<Run> {
        match self.store.get_run(id) {
            Ok(run) => Ok(run),
            Err(StoreError::NotFound { .. } | StoreError::WrongKind { .. }) => Err(ProjectError::InvalidRun { id }),
            Err(e) => Err(e.into()),
        }
    }

    /// Runs in id order; nested runs only when asked
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    pub fn list(&self, include_nested: bool) -> ProjectResult<Vec<Run>> {
        Ok(self
            .store
            .runs()?
            .into_iter()
            .filter(|r| include_nested || !r.is_child())
            .collect())
    }

    /// Runs of one kind, in id order
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    pub fn by_kind(&self, kind: &str) -> ProjectResult<Vec<Run>> {
        let same_kind = |e: &Entity| e.as_run().is_some_and(|r| r.kind == kind);
        self.store
            .query(EntityKind::Run, Some(&same_kind))?
            .into_iter()
            .map(|e| e.into_run().map_err(ProjectError::from))
            .collect()
    }

    /// Stage deletion of a run's output trees and the relations it created
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    pub fn remove_outputs(&mut self, run: &Run) -> ProjectResult<()> {
        let Some(id) = run.id else {
            return Ok(());
        };
        for output in run.output_ids() {
            if !self.store.contains(output)? {
                continue;
            }
            for object in self.store.data_tree(output)? {
                if let Some(object_id) = object.id {
                    self.store.delete(object_id)?;
                }
            }
        }
        self.store.delete_relations_by_creator(id)?;
        Ok(())
    }

    /// Stage deletion of a run with its outputs and relations
    ///
    /// # Errors
    ///
    /// Returns `InvalidRun` if the id is not a run
    pub fn remove(&mut self, id: ObjectId) -> ProjectResult<Run> {
        let run = self.get(id)?;
        self.remove_outputs(&run)?;
        self.store.delete(id)?;
        debug!(run = %id, "Run removed");
        Ok(run)
    }

    /// Commit staged changes
    ///
    /// # Errors
    ///
    /// Returns error if the store rejects the batch
    pub fn commit(&mut self) -> ProjectResult<()> {
        Ok(self.store.commit()?)
    }

    /// Drop staged changes
    pub fn rollback(&mut self) {
        self.store.rollback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runweave_core::{Binding, DataObject, OutputBinding, Relation, RunStatus};

    #[test]
    fn test_setup_assigns_working_dir() {
        let mut registry = RunRegistry::new(Store::in_memory());
        let mut run = Run::new("import");
        let id = registry.setup(&mut run).unwrap();
        assert_eq!(run.id, Some(id));
        assert_eq!(
            run.working_dir,
            Some(PathBuf::from("Runs").join(format!("{}_import", id.padded())))
        );
        assert_eq!(registry.get(id).unwrap(), run);
    }

    #[test]
    fn test_get_rejects_non_runs() {
        let mut registry = RunRegistry::new(Store::in_memory());
        let data = registry
            .store_mut()
            .put_data(&mut DataObject::new("Volume", "vol"))
            .unwrap();
        assert!(matches!(registry.get(data), Err(ProjectError::InvalidRun { .. })));
        assert!(matches!(
            registry.get(ObjectId::from_raw(99)),
            Err(ProjectError::InvalidRun { .. })
        ));
    }

    #[test]
    fn test_list_and_by_kind() {
        let mut registry = RunRegistry::new(Store::in_memory());
        let parent = registry.setup(&mut Run::new("import")).unwrap();
        let mut nested = Run::new("import");
        nested.parent_run = Some(parent);
        registry.setup(&mut nested).unwrap();
        registry.setup(&mut Run::new("filter")).unwrap();

        assert_eq!(registry.list(false).unwrap().len(), 2);
        assert_eq!(registry.list(true).unwrap().len(), 3);
        assert_eq!(registry.by_kind("import").unwrap().len(), 2);
    }

    #[test]
    fn test_remove_drops_outputs_and_relations() {
        let mut registry = RunRegistry::new(Store::in_memory());
        let mut run = Run::new("import");
        let id = registry.setup(&mut run).unwrap();
        let store = registry.store_mut();
        let vol = store.put_data(&mut DataObject::new("Volume", "vol")).unwrap();
        let slice = store
            .put_data(&mut DataObject::new("Slice", "s0").with_parent(vol))
            .unwrap();
        let upstream = store.put_data(&mut DataObject::new("Movie", "m")).unwrap();
        store
            .insert_relation(Relation::new("source", upstream, vol, id))
            .unwrap();
        run.outputs.insert("vol".to_string(), OutputBinding::new(vol, "Volume"));
        run.set_input("in", Binding::literal(1));
        run.status = RunStatus::Finished;
        registry.store_run(&mut run).unwrap();
        registry.commit().unwrap();

        registry.remove(id).unwrap();
        registry.commit().unwrap();
        let store = registry.store();
        assert!(!store.contains(id).unwrap());
        assert!(!store.contains(vol).unwrap());
        assert!(!store.contains(slice).unwrap());
        assert!(store.contains(upstream).unwrap());
        assert!(store.relations_by_child(vol).unwrap().is_empty());
    }
}
