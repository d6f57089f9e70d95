//! runweave project
//!
//! A project directory and the controller for the runs it contains:
//! creating and loading projects, saving, launching, stopping, continuing,
//! copying and deleting runs, keeping their status in sync with the
//! execution gateway, and moving workflows in and out as portable JSON.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod label;
pub mod lifecycle;
pub mod paths;
pub mod project;
pub mod registry;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use config::{ControllerConfig, ProjectOptions};
pub use error::{ProjectError, ProjectResult, WorkflowError};
pub use label::next_label;
pub use lifecycle::DeleteReport;
pub use paths::ProjectPaths;
pub use project::{Project, RelationDirection};
pub use registry::RunRegistry;
pub use workflow::{ImportReport, io_matches};
