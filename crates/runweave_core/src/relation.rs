//! Provenance relations between data objects.

use crate::id::ObjectId;
use serde::{Deserialize, Serialize};

/// Relation name: `parent` was a direct source of `child`
pub const RELATION_SOURCE: &str = "source";

/// Relation name: `child` was produced by transforming `parent`
pub const RELATION_TRANSFORM: &str = "transform";

/// Directed fact `parent -> child` recorded by the run that created `child`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    /// Assigned on first persist
    pub id: Option<ObjectId>,
    /// Relation kind
    pub name: String,
    /// Upstream object
    pub parent_id: ObjectId,
    /// Downstream object
    pub child_id: ObjectId,
    /// Run that recorded the relation
    pub creator: ObjectId,
}

impl Relation {
    /// Create an unsaved relation
    #[must_use]
    pub fn new(name: impl Into<String>, parent_id: ObjectId, child_id: ObjectId, creator: ObjectId) -> Self {
        Self {
            id: None,
            name: name.into(),
            parent_id,
            child_id,
            creator,
        }
    }

    /// True when both relations state the same fact
    #[must_use]
    pub fn same_fact(&self, other: &Relation) -> bool {
        self.name == other.name
            && self.parent_id == other.parent_id
            && self.child_id == other.child_id
            && self.creator == other.creator
    }
}
