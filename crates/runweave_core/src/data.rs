//! Data products registered by runs.

use crate::id::ObjectId;
use serde::{Deserialize, Serialize};

/// A typed data product; composite outputs own sub-objects through `parent`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataObject {
    /// Assigned on first persist
    pub id: Option<ObjectId>,
    /// Type name, e.g. `SetOfParticles`
    pub type_name: String,
    /// Name within its parent, or the output name for top-level products
    pub name: String,
    /// Owning object
    pub parent: Option<ObjectId>,
    /// Free-form attributes
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl DataObject {
    /// Create an unsaved object
    #[must_use]
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: None,
            type_name: type_name.into(),
            name: name.into(),
            parent: None,
            attributes: serde_json::Map::new(),
        }
    }

    /// Set the owning object
    #[must_use]
    pub fn with_parent(mut self, parent: ObjectId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Add an attribute
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}
