//! Transactional entity store.
//!
//! Writes are staged in memory and visible to reads immediately; `commit`
//! hands the whole batch to the backend in one transaction.

use crate::backend::{Backend, Batch, MemoryBackend, RedbBackend};
use crate::error::{StoreError, StoreResult};
use runweave_core::{DataObject, Entity, EntityKind, ObjectId, Pointer, PointerResolver, Run};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Which backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Volatile, for tests and scratch projects
    Memory,
    /// redb database file
    Redb,
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend kind
    pub backend: BackendKind,
    /// Database file name inside the project directory
    pub file_name: String,
}

impl StoreConfig {
    /// Set backend kind
    #[must_use]
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Set database file name
    #[must_use]
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Redb,
            file_name: "project.redb".to_string(),
        }
    }
}

/// Entity store with a staged write overlay
pub struct Store {
    backend: Box<dyn Backend>,
    staged: BTreeMap<ObjectId, Option<Entity>>,
    next_id: u64,
}

impl Store {
    /// Wrap a backend
    ///
    /// # Errors
    ///
    /// Returns error if the id counter cannot be read
    pub fn new(backend: Box<dyn Backend>) -> StoreResult<Self> {
        let next_id = backend.next_id()?;
        Ok(Self {
            backend,
            staged: BTreeMap::new(),
            next_id,
        })
    }

    /// Fresh in-memory store
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            backend: Box::new(MemoryBackend::new()),
            staged: BTreeMap::new(),
            next_id: ObjectId::FIRST.as_u64(),
        }
    }

    /// Open or create a redb store file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened
    pub fn create(path: &Path) -> StoreResult<Self> {
        Self::new(Box::new(RedbBackend::create(path)?))
    }

    /// Open an existing redb store file
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing or cannot be opened
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::new(Box::new(RedbBackend::open(path)?))
    }

    /// Open according to a config, relative to `dir`
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be opened
    pub fn open_with(config: &StoreConfig, dir: &Path) -> StoreResult<Self> {
        match config.backend {
            BackendKind::Memory => Ok(Self::in_memory()),
            BackendKind::Redb => Self::create(&Self::file_path(config, dir)),
        }
    }

    /// Database path for a config
    #[must_use]
    pub fn file_path(config: &StoreConfig, dir: &Path) -> PathBuf {
        dir.join(&config.file_name)
    }

    fn decode(bytes: &[u8]) -> StoreResult<Entity> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn allocate(&mut self) -> ObjectId {
        let id = ObjectId::from_raw(self.next_id);
        self.next_id += 1;
        id
    }

    /// Stage an insert or update; assigns an id when the entity has none
    ///
    /// # Errors
    ///
    /// Never fails today; kept fallible for backends with write-time checks
    pub fn put(&mut self, mut entity: Entity) -> StoreResult<ObjectId> {
        let id = match entity.id() {
            Some(id) => {
                if id.as_u64() >= self.next_id {
                    self.next_id = id.as_u64() + 1;
                }
                id
            }
            None => {
                let id = self.allocate();
                entity.set_id(id);
                id
            }
        };
        self.staged.insert(id, Some(entity));
        Ok(id)
    }

    /// Stage a run, writing the assigned id back into it
    ///
    /// # Errors
    ///
    /// See [`Store::put`]
    pub fn put_run(&mut self, run: &mut Run) -> StoreResult<ObjectId> {
        let id = self.put(Entity::Run(run.clone()))?;
        run.id = Some(id);
        Ok(id)
    }

    /// Stage a data object, writing the assigned id back into it
    ///
    /// # Errors
    ///
    /// See [`Store::put`]
    pub fn put_data(&mut self, data: &mut DataObject) -> StoreResult<ObjectId> {
        let id = self.put(Entity::Data(data.clone()))?;
        data.id = Some(id);
        Ok(id)
    }

    /// Entity by id, if present
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read
    pub fn find(&self, id: ObjectId) -> StoreResult<Option<Entity>> {
        if let Some(staged) = self.staged.get(&id) {
            return Ok(staged.clone());
        }
        match self.backend.load(id)? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Entity by id
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no such entity
    pub fn get(&self, id: ObjectId) -> StoreResult<Entity> {
        self.find(id)?.ok_or(StoreError::NotFound { id })
    }

    /// Run by id
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `WrongKind`
    pub fn get_run(&self, id: ObjectId) -> StoreResult<Run> {
        match self.get(id)? {
            Entity::Run(run) => Ok(run),
            other => Err(StoreError::WrongKind {
                id,
                expected: EntityKind::Run,
                actual: other.kind(),
            }),
        }
    }

    /// Data object by id
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `WrongKind`
    pub fn get_data(&self, id: ObjectId) -> StoreResult<DataObject> {
        match self.get(id)? {
            Entity::Data(data) => Ok(data),
            other => Err(StoreError::WrongKind {
                id,
                expected: EntityKind::Data,
                actual: other.kind(),
            }),
        }
    }

    /// Whether an entity exists
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read
    pub fn contains(&self, id: ObjectId) -> StoreResult<bool> {
        Ok(self.find(id)?.is_some())
    }

    /// Stage a delete
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no such entity
    pub fn delete(&mut self, id: ObjectId) -> StoreResult<()> {
        if !self.contains(id)? {
            return Err(StoreError::NotFound { id });
        }
        self.staged.insert(id, None);
        Ok(())
    }

    /// All entities of a kind in id order, optionally filtered
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read or decoded
    pub fn query(&self, kind: EntityKind, filter: Option<&dyn Fn(&Entity) -> bool>) -> StoreResult<Vec<Entity>> {
        let mut merged: BTreeMap<ObjectId, Entity> = BTreeMap::new();
        for (id, bytes) in self.backend.scan()? {
            if !self.staged.contains_key(&id) {
                merged.insert(id, Self::decode(&bytes)?);
            }
        }
        for (id, staged) in &self.staged {
            if let Some(entity) = staged {
                merged.insert(*id, entity.clone());
            }
        }
        Ok(merged
            .into_values()
            .filter(|e| e.kind() == kind)
            .filter(|e| filter.is_none_or(|f| f(e)))
            .collect())
    }

    /// All runs, nested ones included
    ///
    /// # Errors
    ///
    /// See [`Store::query`]
    pub fn runs(&self) -> StoreResult<Vec<Run>> {
        self.query(EntityKind::Run, None)?
            .into_iter()
            .map(|e| e.into_run().map_err(|err| StoreError::Serialization { reason: err.to_string() }))
            .collect()
    }

    /// Direct children of a data object
    ///
    /// # Errors
    ///
    /// See [`Store::query`]
    pub fn children_of(&self, id: ObjectId) -> StoreResult<Vec<DataObject>> {
        let is_child = move |e: &Entity| e.as_data().is_some_and(|d| d.parent == Some(id));
        Ok(self
            .query(EntityKind::Data, Some(&is_child))?
            .into_iter()
            .filter_map(|e| e.as_data().cloned())
            .collect())
    }

    /// A data object and all its descendants, parents before children
    ///
    /// # Errors
    ///
    /// See [`Store::query`]
    pub fn data_tree(&self, root: ObjectId) -> StoreResult<Vec<DataObject>> {
        let mut out = vec![self.get_data(root)?];
        let mut idx = 0;
        while idx < out.len() {
            if let Some(id) = out[idx].id {
                out.extend(self.children_of(id)?);
            }
            idx += 1;
        }
        Ok(out)
    }

    /// Declared parent of a data object
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read
    pub fn parent_id(&self, id: ObjectId) -> StoreResult<Option<ObjectId>> {
        Ok(self.find(id)?.and_then(|e| e.as_data().and_then(|d| d.parent)))
    }

    /// Apply all staged writes atomically
    ///
    /// # Errors
    ///
    /// Returns error if the backend rejects the batch; the staged writes are
    /// discarded either way
    pub fn commit(&mut self) -> StoreResult<()> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let staged = std::mem::take(&mut self.staged);
        let mut batch = Batch {
            writes: BTreeMap::new(),
            next_id: self.next_id,
        };
        for (id, entity) in staged {
            let bytes = match entity {
                Some(e) => Some(serde_json::to_vec(&e)?),
                None => None,
            };
            batch.writes.insert(id, bytes);
        }
        match self.backend.apply(&batch) {
            Ok(()) => {
                debug!(writes = batch.len(), "Store commit");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, writes = batch.len(), "Store commit failed, staged writes discarded");
                Err(e)
            }
        }
    }

    /// Discard all staged writes
    pub fn rollback(&mut self) {
        if !self.staged.is_empty() {
            debug!(discarded = self.staged.len(), "Store rollback");
        }
        self.staged.clear();
    }

    /// Number of staged writes
    #[must_use]
    pub fn pending(&self) -> usize {
        self.staged.len()
    }

    /// Next id that will be assigned
    #[must_use]
    pub fn peek_next_id(&self) -> ObjectId {
        ObjectId::from_raw(self.next_id)
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("staged", &self.staged.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl PointerResolver for Store {
    fn resolve(&self, pointer: &Pointer) -> Option<ObjectId> {
        let target = pointer.target?;
        let entity = match self.find(target) {
            Ok(Some(entity)) => entity,
            Ok(None) => return None,
            Err(e) => {
                debug!(%target, error = %e, "Pointer target unreadable");
                return None;
            }
        };
        match (entity, &pointer.extended) {
            // Outputs not produced yet resolve to the run itself.
            (Entity::Run(run), Some(name)) => Some(run.outputs.get(name).map_or(target, |o| o.object_id)),
            (Entity::Data(_), Some(name)) => {
                let named = self
                    .children_of(target)
                    .ok()
                    .and_then(|children| children.into_iter().find(|c| &c.name == name))
                    .and_then(|c| c.id);
                Some(named.unwrap_or(target))
            }
            (Entity::Relation(_), _) => None,
            (_, None) => Some(target),
        }
    }

    fn parent_of(&self, id: ObjectId) -> Option<ObjectId> {
        self.parent_id(id).ok().flatten()
    }
}
