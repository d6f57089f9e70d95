//! Project error types.

use runweave_core::{CoreError, ObjectId, RunStatus};
use runweave_plan::{Dependency, ValidationError};
use runweave_runtime::GatewayError;
use runweave_storage::StoreError;
use std::path::PathBuf;

/// Project result type
pub type ProjectResult<T> = Result<T, ProjectError>;

/// Errors raised by project operations
///
/// Precondition variants are returned before anything is changed.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    /// Project is read-only
    #[error("Cannot {action}: the project is read-only")]
    ReadOnly {
        /// Refused action
        action: String,
    },

    /// Runs outside the selection depend on runs inside it
    #[error("Cannot {action}:{}", format_dependencies(.offenders))]
    Dependencies {
        /// Refused action
        action: String,
        /// Every offending edge
        offenders: Vec<Dependency>,
    },

    /// No protocol kind with this name
    #[error("Unknown protocol kind: {kind}")]
    InvalidRunKind {
        /// Requested kind
        kind: String,
    },

    /// Id does not designate a run
    #[error("Object {id} is not a run")]
    InvalidRun {
        /// Requested id
        id: ObjectId,
    },

    /// An input points back at its own run
    #[error("Input '{input}' of run {run} references the run itself")]
    SelfReference {
        /// Offending run
        run: String,
        /// Offending input
        input: String,
    },

    /// Runs would depend on each other in a loop
    #[error("Runs would form a cycle: {}", runs.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> "))]
    Cycle {
        /// Cycle path, first run repeated at the end
        runs: Vec<ObjectId>,
    },

    /// Run is in a state that cannot be saved
    #[error("Cannot save run {run} while it is {status}")]
    CannotSave {
        /// Run label
        run: String,
        /// Its status
        status: RunStatus,
    },

    /// Run is not paused for interaction
    #[error("Cannot continue run {run}: it is {status}, not interactive")]
    CannotContinue {
        /// Run label
        run: String,
        /// Its status
        status: RunStatus,
    },

    /// Run is already executing
    #[error("Cannot launch run {run}: it is already {status}")]
    CannotLaunch {
        /// Run label
        run: String,
        /// Its status
        status: RunStatus,
    },

    /// Run is neither executing nor paused
    #[error("Cannot stop run {run}: it is {status}")]
    CannotStop {
        /// Run label
        run: String,
        /// Its status
        status: RunStatus,
    },

    /// Directory holds no project
    #[error("Not a project directory: {}", path.display())]
    NotAProject {
        /// Directory looked at
        path: PathBuf,
    },

    /// Entity store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Core error
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Execution gateway error
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Workflow file error
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// Filesystem error
    #[error("IO error on {}: {source}", path.display())]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl ProjectError {
    /// Build an `Io` error
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for refusals that left the project untouched
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::ReadOnly { .. }
                | Self::Dependencies { .. }
                | Self::InvalidRunKind { .. }
                | Self::InvalidRun { .. }
                | Self::SelfReference { .. }
                | Self::Cycle { .. }
                | Self::CannotSave { .. }
                | Self::CannotContinue { .. }
                | Self::CannotLaunch { .. }
                | Self::CannotStop { .. }
        )
    }
}

impl From<ValidationError> for ProjectError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::SelfReference { run, input } => Self::SelfReference { run, input },
            ValidationError::Cycle { runs } => Self::Cycle { runs },
        }
    }
}

fn format_dependencies(offenders: &[Dependency]) -> String {
    let mut out = String::new();
    let mut current: Option<ObjectId> = None;
    for dep in offenders {
        if current != Some(dep.run) {
            out.push_str(&format!("\n *{}* is referenced from:", dep.run_label));
            current = Some(dep.run);
        }
        out.push_str(&format!("\n   - {}", dep.dependent_label));
    }
    out
}

/// Workflow file errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    /// Not valid JSON, or not an array of records
    #[error("Invalid workflow: {0}")]
    Parse(String),

    /// A record lacks a required field
    #[error("Workflow record {index} has no '{field}' field")]
    MissingField {
        /// Record position
        index: usize,
        /// Missing field
        field: &'static str,
    },
}
