//! Per-run private snapshots.
//!
//! At launch the committed project state is copied into a run's own redb
//! file. The executing run writes its status and outputs there; the project
//! later reads them back with [`RunSnapshot::read`].

use crate::backend::{Backend, Batch, RedbBackend};
use crate::error::StoreResult;
use crate::store::Store;
use runweave_core::{DataObject, ObjectId, Run};
use std::path::Path;
use tracing::debug;

impl Store {
    /// Write the committed state to a new redb file at `path`
    ///
    /// Staged writes are not included. An existing file is replaced.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created or written
    pub fn snapshot_to(&self, path: &Path) -> StoreResult<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let source = self.backend();
        let batch = Batch {
            writes: source
                .scan()?
                .into_iter()
                .map(|(id, bytes)| (id, Some(bytes)))
                .collect(),
            next_id: source.next_id()?,
        };
        let mut target = RedbBackend::create(path)?;
        target.apply(&batch)?;
        debug!(path = %path.display(), entities = batch.len(), "Wrote run snapshot");
        Ok(())
    }
}

/// State of one run as recorded in its private snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct RunSnapshot {
    /// The run as last written by its execution
    pub run: Run,
    /// Output objects and their descendants, parents first
    pub objects: Vec<DataObject>,
}

impl RunSnapshot {
    /// Read a run and its output trees from a snapshot file
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing, unreadable or lacks the run
    pub fn read(path: &Path, run_id: ObjectId) -> StoreResult<Self> {
        let store = Store::open(path)?;
        let run = store.get_run(run_id)?;
        let mut objects = Vec::new();
        for id in run.output_ids() {
            objects.extend(store.data_tree(id)?);
        }
        Ok(Self { run, objects })
    }
}
