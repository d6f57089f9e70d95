//! runweave storage
//!
//! Transactional entity store over a pluggable backend (in-memory or redb),
//! per-run private snapshots and the provenance relation index.
//! Writes are staged and applied atomically on commit.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod relation;
pub mod snapshot;
pub mod store;

pub use backend::{Backend, Batch, MemoryBackend, RedbBackend};
pub use error::{StoreError, StoreResult};
pub use relation::{RelationIndex, derive_relations};
pub use snapshot::RunSnapshot;
pub use store::{BackendKind, Store, StoreConfig};
