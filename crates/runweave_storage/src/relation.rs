//! Provenance relation index.
//!
//! Relations are plain entities in the store; the index answers lookups by
//! scanning them. They are appended when a run registers its outputs and
//! removed only together with the creator run.

use crate::error::StoreResult;
use crate::store::Store;
use runweave_core::{
    Entity, EntityKind, ObjectId, PointerResolver, RELATION_SOURCE, RELATION_TRANSFORM, Relation, Run,
};
use tracing::debug;

/// Lookups and writes over stored relations
pub trait RelationIndex {
    /// Stage a relation
    ///
    /// # Errors
    ///
    /// Returns error if the relation cannot be staged
    fn insert_relation(&mut self, relation: Relation) -> StoreResult<ObjectId>;

    /// Relations whose parent is `id`
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    fn relations_by_parent(&self, id: ObjectId) -> StoreResult<Vec<Relation>>;

    /// Relations whose child is `id`
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    fn relations_by_child(&self, id: ObjectId) -> StoreResult<Vec<Relation>>;

    /// All relations with a given name
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    fn relations_of_kind(&self, name: &str) -> StoreResult<Vec<Relation>>;

    /// Stage deletion of every relation recorded by `run`; returns how many
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    fn delete_relations_by_creator(&mut self, run: ObjectId) -> StoreResult<usize>;
}

impl Store {
    fn relations_matching(&self, pred: &dyn Fn(&Relation) -> bool) -> StoreResult<Vec<Relation>> {
        let filter = |e: &Entity| e.as_relation().is_some_and(pred);
        Ok(self
            .query(EntityKind::Relation, Some(&filter))?
            .into_iter()
            .filter_map(|e| e.as_relation().cloned())
            .collect())
    }
}

impl RelationIndex for Store {
    fn insert_relation(&mut self, relation: Relation) -> StoreResult<ObjectId> {
        self.put(Entity::Relation(relation))
    }

    fn relations_by_parent(&self, id: ObjectId) -> StoreResult<Vec<Relation>> {
        self.relations_matching(&|r| r.parent_id == id)
    }

    fn relations_by_child(&self, id: ObjectId) -> StoreResult<Vec<Relation>> {
        self.relations_matching(&|r| r.child_id == id)
    }

    fn relations_of_kind(&self, name: &str) -> StoreResult<Vec<Relation>> {
        self.relations_matching(&|r| r.name == name)
    }

    fn delete_relations_by_creator(&mut self, run: ObjectId) -> StoreResult<usize> {
        let owned = self.relations_matching(&|r| r.creator == run)?;
        for rel in &owned {
            if let Some(id) = rel.id {
                self.delete(id)?;
            }
        }
        debug!(%run, removed = owned.len(), "Removed relations of run");
        Ok(owned.len())
    }
}

/// Relations implied by a run's resolved inputs and registered outputs
///
/// For every input data object `P` and output `O` both `source` and
/// `transform` facts `P -> O` are produced, plus `PP -> O` when `P` has a
/// parent `PP`.
#[must_use]
pub fn derive_relations(run: &Run, store: &Store) -> Vec<Relation> {
    let Some(creator) = run.id else {
        return Vec::new();
    };
    let mut parents: Vec<ObjectId> = Vec::new();
    for (_, pointer) in run.pointers() {
        let Some(obj) = store.resolve(pointer) else {
            continue;
        };
        // Only data objects carry lineage.
        if !matches!(store.find(obj), Ok(Some(Entity::Data(_)))) {
            continue;
        }
        for candidate in std::iter::once(obj).chain(store.parent_of(obj)) {
            if !parents.contains(&candidate) {
                parents.push(candidate);
            }
        }
    }

    let mut out = Vec::new();
    for output in run.output_ids() {
        for parent in &parents {
            if *parent == output {
                continue;
            }
            for name in [RELATION_SOURCE, RELATION_TRANSFORM] {
                let rel = Relation::new(name, *parent, output, creator);
                if !out.iter().any(|r: &Relation| r.same_fact(&rel)) {
                    out.push(rel);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use runweave_core::{Binding, DataObject, OutputBinding};

    fn producer(store: &mut Store) -> (ObjectId, ObjectId, ObjectId) {
        let mut set = DataObject::new("SetOfImages", "outputImages");
        let set_id = store.put_data(&mut set).unwrap();
        let item = store
            .put(DataObject::new("Image", "img").with_parent(set_id).into())
            .unwrap();
        let mut run = Run::new("import");
        run.outputs
            .insert("outputImages".to_string(), OutputBinding::new(set_id, "SetOfImages"));
        let run_id = store.put_run(&mut run).unwrap();
        (run_id, set_id, item)
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut store = Store::in_memory();
        let a = ObjectId::from_raw(100);
        let b = ObjectId::from_raw(101);
        let creator = ObjectId::from_raw(102);
        store
            .insert_relation(Relation::new(RELATION_SOURCE, a, b, creator))
            .unwrap();
        store
            .insert_relation(Relation::new(RELATION_TRANSFORM, a, b, creator))
            .unwrap();
        assert_eq!(store.relations_by_parent(a).unwrap().len(), 2);
        assert_eq!(store.relations_by_child(b).unwrap().len(), 2);
        assert_eq!(store.relations_of_kind(RELATION_SOURCE).unwrap().len(), 1);
        assert_eq!(store.delete_relations_by_creator(creator).unwrap(), 2);
        assert!(store.relations_by_parent(a).unwrap().is_empty());
    }

    #[test]
    fn test_derive_relations_one_hop_up() {
        let mut store = Store::in_memory();
        let (_, set_id, item) = producer(&mut store);

        let mut out = DataObject::new("Volume", "vol");
        let out_id = store.put_data(&mut out).unwrap();
        let mut consumer = Run::new("reconstruct")
            .with_input("image", Binding::Pointer(runweave_core::Pointer::new(item)));
        consumer
            .outputs
            .insert("vol".to_string(), OutputBinding::new(out_id, "Volume"));
        store.put_run(&mut consumer).unwrap();

        let rels = derive_relations(&consumer, &store);
        assert_eq!(rels.len(), 4);
        assert!(rels.iter().any(|r| r.name == RELATION_SOURCE && r.parent_id == item && r.child_id == out_id));
        assert!(rels.iter().any(|r| r.name == RELATION_TRANSFORM && r.parent_id == set_id && r.child_id == out_id));
    }

    #[test]
    fn test_derive_relations_through_run_output() {
        let mut store = Store::in_memory();
        let (run_id, set_id, _) = producer(&mut store);
        let mut out = DataObject::new("SetOfImages", "filtered");
        let out_id = store.put_data(&mut out).unwrap();
        let mut consumer = Run::new("filter").with_input("input", Binding::output_of(run_id, "outputImages"));
        consumer
            .outputs
            .insert("filtered".to_string(), OutputBinding::new(out_id, "SetOfImages"));
        store.put_run(&mut consumer).unwrap();

        let rels = derive_relations(&consumer, &store);
        assert_eq!(rels.len(), 2);
        assert!(rels.iter().all(|r| r.parent_id == set_id && r.child_id == out_id));
    }

    #[test]
    fn test_unsaved_run_derives_nothing() {
        let store = Store::in_memory();
        assert!(derive_relations(&Run::new("import"), &store).is_empty());
    }
}
