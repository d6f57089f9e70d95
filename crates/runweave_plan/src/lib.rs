//! runweave planner
//!
//! Derived, never persisted views over the entity store: the dependency
//! graph of runs (with a synthetic `PROJECT` root), its validation, and
//! the provenance graphs of data objects.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod dag;
pub mod relation_graph;
pub mod validate;

pub use builder::GraphBuilder;
pub use dag::{Dependency, Edge, GraphNode, ROOT_LABEL, RunsGraph};
pub use relation_graph::{ObjectGraph, ObjectNode, build_relation_graph};
pub use validate::{ValidationError, Validator};
