//! Storage backends.
//!
//! A backend holds committed entity bytes keyed by id plus the id counter.
//! It only ever sees whole batches, applied all-or-nothing.

use crate::error::{StoreError, StoreResult};
use redb::{Database, ReadableTable, TableDefinition};
use runweave_core::ObjectId;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Staged writes applied in one transaction; `None` deletes the key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    /// Entity bytes by id
    pub writes: BTreeMap<ObjectId, Option<Vec<u8>>>,
    /// Id counter after the batch
    pub next_id: u64,
}

impl Batch {
    /// Number of keys touched
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// True when nothing is written
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Committed storage
pub trait Backend: Send + Sync {
    /// Bytes of one entity
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read
    fn load(&self, id: ObjectId) -> StoreResult<Option<Vec<u8>>>;

    /// All entities in id order
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read
    fn scan(&self) -> StoreResult<Vec<(ObjectId, Vec<u8>)>>;

    /// Persisted id counter
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read
    fn next_id(&self) -> StoreResult<u64>;

    /// Apply a batch atomically
    ///
    /// # Errors
    ///
    /// Returns error if the batch could not be applied; nothing is applied then
    fn apply(&mut self, batch: &Batch) -> StoreResult<()>;
}

/// In-memory backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: BTreeMap<ObjectId, Vec<u8>>,
    next_id: u64,
}

impl MemoryBackend {
    /// Create an empty backend
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: ObjectId::FIRST.as_u64(),
        }
    }
}

impl Backend for MemoryBackend {
    fn load(&self, id: ObjectId) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.get(&id).cloned())
    }

    fn scan(&self) -> StoreResult<Vec<(ObjectId, Vec<u8>)>> {
        Ok(self.entries.iter().map(|(k, v)| (*k, v.clone())).collect())
    }

    fn next_id(&self) -> StoreResult<u64> {
        Ok(self.next_id)
    }

    fn apply(&mut self, batch: &Batch) -> StoreResult<()> {
        for (id, write) in &batch.writes {
            match write {
                Some(bytes) => {
                    self.entries.insert(*id, bytes.clone());
                }
                None => {
                    self.entries.remove(id);
                }
            }
        }
        self.next_id = self.next_id.max(batch.next_id);
        Ok(())
    }
}

const ENTITIES: TableDefinition<u64, &[u8]> = TableDefinition::new("entities");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");
const NEXT_ID_KEY: &str = "next_id";

/// Durable backend on a redb file
pub struct RedbBackend {
    db: Database,
    path: PathBuf,
}

impl RedbBackend {
    /// Open or create the database file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or initialized
    pub fn create(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(|e| StoreError::backend("create database", e))?;
        Self::init(db, path)
    }

    /// Open an existing database file
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing or cannot be opened
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::open(path).map_err(|e| StoreError::backend("open database", e))?;
        Self::init(db, path)
    }

    fn init(db: Database, path: &Path) -> StoreResult<Self> {
        let txn = db
            .begin_write()
            .map_err(|e| StoreError::backend("begin transaction", e))?;
        txn.open_table(ENTITIES)
            .map_err(|e| StoreError::backend("create entities table", e))?;
        txn.open_table(META)
            .map_err(|e| StoreError::backend("create meta table", e))?;
        txn.commit()
            .map_err(|e| StoreError::backend("commit schema", e))?;
        debug!(path = %path.display(), "Opened redb store");
        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    /// Database file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend").field("path", &self.path).finish()
    }
}

impl Backend for RedbBackend {
    fn load(&self, id: ObjectId) -> StoreResult<Option<Vec<u8>>> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| StoreError::backend("begin read", e))?;
        let table = txn
            .open_table(ENTITIES)
            .map_err(|e| StoreError::backend("open entities table", e))?;
        let value = table
            .get(id.as_u64())
            .map_err(|e| StoreError::backend("read entity", e))?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn scan(&self) -> StoreResult<Vec<(ObjectId, Vec<u8>)>> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| StoreError::backend("begin read", e))?;
        let table = txn
            .open_table(ENTITIES)
            .map_err(|e| StoreError::backend("open entities table", e))?;
        let mut out = Vec::new();
        for item in table.iter().map_err(|e| StoreError::backend("scan entities", e))? {
            let (key, value) = item.map_err(|e| StoreError::backend("scan entities", e))?;
            out.push((ObjectId::from_raw(key.value()), value.value().to_vec()));
        }
        Ok(out)
    }

    fn next_id(&self) -> StoreResult<u64> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| StoreError::backend("begin read", e))?;
        let table = txn
            .open_table(META)
            .map_err(|e| StoreError::backend("open meta table", e))?;
        let value = table
            .get(NEXT_ID_KEY)
            .map_err(|e| StoreError::backend("read id counter", e))?;
        Ok(value.map_or(ObjectId::FIRST.as_u64(), |v| v.value()))
    }

    fn apply(&mut self, batch: &Batch) -> StoreResult<()> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::backend("begin transaction", e))?;
        {
            let mut table = txn
                .open_table(ENTITIES)
                .map_err(|e| StoreError::backend("open entities table", e))?;
            for (id, write) in &batch.writes {
                match write {
                    Some(bytes) => {
                        table
                            .insert(id.as_u64(), bytes.as_slice())
                            .map_err(|e| StoreError::backend("insert entity", e))?;
                    }
                    None => {
                        table
                            .remove(id.as_u64())
                            .map_err(|e| StoreError::backend("remove entity", e))?;
                    }
                }
            }
            let mut meta = txn
                .open_table(META)
                .map_err(|e| StoreError::backend("open meta table", e))?;
            meta.insert(NEXT_ID_KEY, batch.next_id)
                .map_err(|e| StoreError::backend("write id counter", e))?;
        }
        txn.commit()
            .map_err(|e| StoreError::backend("commit transaction", e))?;
        debug!(writes = batch.len(), next_id = batch.next_id, "Committed batch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(entries: &[(u64, Option<&[u8]>)], next_id: u64) -> Batch {
        Batch {
            writes: entries
                .iter()
                .map(|(k, v)| (ObjectId::from_raw(*k), v.map(<[u8]>::to_vec)))
                .collect(),
            next_id,
        }
    }

    #[test]
    fn test_memory_backend_apply() {
        let mut backend = MemoryBackend::new();
        assert_eq!(backend.next_id().unwrap(), 1);
        backend.apply(&batch(&[(1, Some(b"a")), (2, Some(b"b"))], 3)).unwrap();
        backend.apply(&batch(&[(1, None)], 3)).unwrap();
        assert!(backend.load(ObjectId::from_raw(1)).unwrap().is_none());
        assert_eq!(backend.load(ObjectId::from_raw(2)).unwrap(), Some(b"b".to_vec()));
        assert_eq!(backend.next_id().unwrap(), 3);
    }

    #[test]
    fn test_redb_backend_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.redb");
        {
            let mut backend = RedbBackend::create(&path).unwrap();
            backend.apply(&batch(&[(5, Some(b"five")), (6, Some(b"six"))], 7)).unwrap();
        }
        let backend = RedbBackend::open(&path).unwrap();
        assert_eq!(backend.next_id().unwrap(), 7);
        let all = backend.scan().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, ObjectId::from_raw(5));
        assert_eq!(all[1].1, b"six".to_vec());
    }

    #[test]
    fn test_redb_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = RedbBackend::open(&dir.path().join("missing.redb")).unwrap_err();
        assert!(matches!(err, StoreError::Backend { .. }));
    }
}
