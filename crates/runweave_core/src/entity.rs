//! Heterogeneous entities sharing one id space.

use crate::data::DataObject;
use crate::error::{CoreError, CoreResult};
use crate::id::ObjectId;
use crate::relation::Relation;
use crate::run::Run;
use serde::{Deserialize, Serialize};

/// Kind tag of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Protocol run
    Run,
    /// Data product
    Data,
    /// Provenance relation
    Relation,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Run => write!(f, "Run"),
            Self::Data => write!(f, "Data"),
            Self::Relation => write!(f, "Relation"),
        }
    }
}

/// Anything the entity store persists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum Entity {
    /// Protocol run
    Run(Run),
    /// Data product
    Data(DataObject),
    /// Provenance relation
    Relation(Relation),
}

impl Entity {
    /// Kind tag
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Run(_) => EntityKind::Run,
            Self::Data(_) => EntityKind::Data,
            Self::Relation(_) => EntityKind::Relation,
        }
    }

    /// Persisted id, if assigned
    #[must_use]
    pub fn id(&self) -> Option<ObjectId> {
        match self {
            Self::Run(r) => r.id,
            Self::Data(d) => d.id,
            Self::Relation(r) => r.id,
        }
    }

    /// Assign the id
    pub fn set_id(&mut self, id: ObjectId) {
        match self {
            Self::Run(r) => r.id = Some(id),
            Self::Data(d) => d.id = Some(id),
            Self::Relation(r) => r.id = Some(id),
        }
    }

    /// Borrow as run
    #[must_use]
    pub fn as_run(&self) -> Option<&Run> {
        match self {
            Self::Run(r) => Some(r),
            _ => None,
        }
    }

    /// Borrow as data object
    #[must_use]
    pub fn as_data(&self) -> Option<&DataObject> {
        match self {
            Self::Data(d) => Some(d),
            _ => None,
        }
    }

    /// Borrow as relation
    #[must_use]
    pub fn as_relation(&self) -> Option<&Relation> {
        match self {
            Self::Relation(r) => Some(r),
            _ => None,
        }
    }

    /// Convert into a run
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the entity is not a run
    pub fn into_run(self) -> CoreResult<Run> {
        match self {
            Self::Run(r) => Ok(r),
            other => Err(wrong_kind(&other, EntityKind::Run)),
        }
    }

    /// Convert into a data object
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the entity is not a data object
    pub fn into_data(self) -> CoreResult<DataObject> {
        match self {
            Self::Data(d) => Ok(d),
            other => Err(wrong_kind(&other, EntityKind::Data)),
        }
    }
}

fn wrong_kind(entity: &Entity, expected: EntityKind) -> CoreError {
    CoreError::Validation {
        field: "entity".to_string(),
        reason: format!(
            "{} {} is not a {}",
            entity.kind(),
            entity.id().map_or_else(|| "?".to_string(), |id| id.to_string()),
            expected
        ),
    }
}

impl From<Run> for Entity {
    fn from(run: Run) -> Self {
        Self::Run(run)
    }
}

impl From<DataObject> for Entity {
    fn from(data: DataObject) -> Self {
        Self::Data(data)
    }
}

impl From<Relation> for Entity {
    fn from(relation: Relation) -> Self {
        Self::Relation(relation)
    }
}
