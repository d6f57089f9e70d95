//! Store errors.

use runweave_core::{CoreError, EntityKind, ObjectId};

/// Store result type
pub type StoreResult<T> = Result<T, StoreError>;

/// Store error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No entity with this id
    #[error("Entity not found: {id}")]
    NotFound {
        /// Requested id
        id: ObjectId,
    },

    /// Entity exists but has another kind
    #[error("Entity {id} is a {actual}, expected a {expected}")]
    WrongKind {
        /// Requested id
        id: ObjectId,
        /// Kind the caller asked for
        expected: EntityKind,
        /// Kind actually stored
        actual: EntityKind,
    },

    /// Backend failure
    #[error("Storage backend error during {operation}: {reason}")]
    Backend {
        /// What was being done
        operation: String,
        /// Backend message
        reason: String,
    },

    /// Stored bytes could not be decoded, or an entity could not be encoded
    #[error("Serialization error: {reason}")]
    Serialization {
        /// Codec message
        reason: String,
    },

    /// Filesystem failure around a store file
    #[error("IO error: {reason}")]
    Io {
        /// OS message
        reason: String,
    },
}

impl StoreError {
    /// Backend error for an operation
    pub fn backend(operation: &str, err: impl std::fmt::Display) -> Self {
        Self::Backend {
            operation: operation.to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            reason: err.to_string(),
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { id } => CoreError::NotFound {
                kind: "Entity".to_string(),
                id: id.to_string(),
            },
            other => CoreError::Validation {
                field: "store".to_string(),
                reason: other.to_string(),
            },
        }
    }
}
