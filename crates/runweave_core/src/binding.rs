//! Input bindings of a run.
//!
//! An input is either a literal parameter value or a pointer to another
//! persisted entity (a run, or one of its data products).

use crate::id::ObjectId;
use serde::{Deserialize, Serialize};

/// Literal parameter value
pub type ParamValue = serde_json::Value;

/// Marker prefixed to the output name in exported pointer strings
pub const EXTENDED_MARK: &str = "~";

/// A named input of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Binding {
    /// Plain value
    Literal(ParamValue),
    /// Reference to another entity
    Pointer(Pointer),
}

impl Binding {
    /// Literal binding from anything convertible to JSON
    #[must_use]
    pub fn literal(value: impl Into<ParamValue>) -> Self {
        Self::Literal(value.into())
    }

    /// Pointer binding to a run output
    #[must_use]
    pub fn output_of(run: ObjectId, output: impl Into<String>) -> Self {
        Self::Pointer(Pointer::new(run).with_extended(output))
    }

    /// Pointer, if this is one
    #[must_use]
    pub fn as_pointer(&self) -> Option<&Pointer> {
        match self {
            Self::Pointer(p) => Some(p),
            Self::Literal(_) => None,
        }
    }

    /// Literal value, if this is one
    #[must_use]
    pub fn as_literal(&self) -> Option<&ParamValue> {
        match self {
            Self::Literal(v) => Some(v),
            Self::Pointer(_) => None,
        }
    }
}

/// Reference to a persisted entity, optionally narrowed to a named output
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pointer {
    /// Target run or data object
    pub target: Option<ObjectId>,
    /// Output name of the target run, or child name of the target object
    pub extended: Option<String>,
}

impl Pointer {
    /// Pointer to a whole entity
    #[must_use]
    pub fn new(target: ObjectId) -> Self {
        Self {
            target: Some(target),
            extended: None,
        }
    }

    /// Pointer with no target; never a graph edge
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Narrow to a named output
    #[must_use]
    pub fn with_extended(mut self, name: impl Into<String>) -> Self {
        self.extended = Some(name.into());
        self
    }

    /// True when there is no target
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.target.is_none()
    }

    /// Portable string form: `"<id>"` or `"<id>.~<name>"`
    #[must_use]
    pub fn to_workflow_ref(&self) -> Option<String> {
        let target = self.target?;
        Some(match &self.extended {
            Some(name) => format!("{}.{}{}", target, EXTENDED_MARK, name),
            None => target.to_string(),
        })
    }

    /// Parse the portable string form back into `(target, extended)`
    #[must_use]
    pub fn parse_workflow_ref(value: &str) -> Option<(String, Option<String>)> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        match value.split_once('.') {
            Some((id, rest)) => {
                let name = rest.strip_prefix(EXTENDED_MARK).unwrap_or(rest);
                Some((id.to_string(), Some(name.to_string())))
            }
            None => Some((value.to_string(), None)),
        }
    }
}

/// Resolves pointers against persisted state
pub trait PointerResolver {
    /// Id of the object the pointer designates, if it currently resolves
    fn resolve(&self, pointer: &Pointer) -> Option<ObjectId>;

    /// Declared parent object of `id`, if any
    fn parent_of(&self, id: ObjectId) -> Option<ObjectId>;
}
