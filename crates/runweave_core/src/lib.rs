//! runweave core types
//!
//! Plain data types shared by every runweave crate: identifiers, runs and
//! their bindings, data objects, relations, project settings and host
//! configuration. Nothing here touches the entity store.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod binding;
pub mod data;
pub mod entity;
pub mod error;
pub mod host;
pub mod id;
pub mod relation;
pub mod run;
pub mod settings;
pub mod time;

// Re-exports
pub use binding::{Binding, EXTENDED_MARK, ParamValue, Pointer, PointerResolver};
pub use data::DataObject;
pub use entity::{Entity, EntityKind};
pub use error::{CoreError, CoreResult};
pub use host::{HostConfig, HostsConfig, LOCALHOST};
pub use id::ObjectId;
pub use relation::{RELATION_SOURCE, RELATION_TRANSFORM, Relation};
pub use run::{OutputBinding, Run, RunStatus};
pub use settings::ProjectSettings;
pub use time::Timestamp;
