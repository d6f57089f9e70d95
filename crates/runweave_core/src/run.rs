//! Protocol runs and their status.

use crate::binding::{Binding, ParamValue, Pointer};
use crate::host::LOCALHOST;
use crate::id::ObjectId;
use crate::time::Timestamp;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Defined, never launched or saved again after a run
    Saved,
    /// Handed to the execution gateway
    Launched,
    /// Executing
    Running,
    /// Paused, waiting for user interaction
    Interactive,
    /// Interactive and waiting for an explicit approval
    WaitingApproval,
    /// Completed successfully
    Finished,
    /// Completed with an error
    Failed,
    /// Stopped by the user
    Aborted,
}

impl RunStatus {
    /// Position in the lifecycle; polled updates never lower it
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Saved => 0,
            Self::Launched => 1,
            Self::Running => 2,
            Self::Interactive | Self::WaitingApproval => 3,
            Self::Finished | Self::Failed | Self::Aborted => 4,
        }
    }

    /// Whether a polled update may move this status to `next`
    #[must_use]
    pub fn can_advance_to(&self, next: RunStatus) -> bool {
        next.rank() > self.rank() || (*self == Self::Interactive && next == Self::WaitingApproval)
    }

    /// Launched or running
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Launched | Self::Running)
    }

    /// Finished, failed or aborted
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Aborted)
    }

    /// Paused for interaction
    #[must_use]
    pub const fn is_interactive(&self) -> bool {
        matches!(self, Self::Interactive | Self::WaitingApproval)
    }

    /// Lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Saved => "saved",
            Self::Launched => "launched",
            Self::Running => "running",
            Self::Interactive => "interactive",
            Self::WaitingApproval => "waiting approval",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named output of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputBinding {
    /// Produced data object
    pub object_id: ObjectId,
    /// Its type name
    pub type_name: String,
}

impl OutputBinding {
    /// Create an output binding
    #[must_use]
    pub fn new(object_id: ObjectId, type_name: impl Into<String>) -> Self {
        Self {
            object_id,
            type_name: type_name.into(),
        }
    }
}

/// One execution instance of a protocol kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Assigned on first persist
    pub id: Option<ObjectId>,
    /// Protocol kind identifier
    pub kind: String,
    /// Display label
    pub label: String,
    /// Free text
    pub comment: String,
    /// Working directory relative to the project root
    pub working_dir: Option<PathBuf>,
    /// Lifecycle status
    pub status: RunStatus,
    /// Handle returned by the execution gateway
    pub job_id: Option<String>,
    /// Execution host name
    pub host: String,
    /// Kind has an approval gate; relaunch skips the dependency check
    pub interactive: bool,
    /// Named inputs in declaration order
    pub inputs: IndexMap<String, Binding>,
    /// Named outputs in registration order
    pub outputs: IndexMap<String, OutputBinding>,
    /// Failure cause
    pub error: Option<String>,
    /// Enclosing run for nested runs; nested runs stay out of the graph
    pub parent_run: Option<ObjectId>,
    /// Creation time
    pub created_at: Timestamp,
    /// Last status or definition change
    pub updated_at: Timestamp,
}

impl Run {
    /// Private snapshot path inside the working directory
    pub const SNAPSHOT_FILE: &'static str = "logs/run.redb";

    /// Create an unsaved run of the given kind
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            id: None,
            kind: kind.into(),
            label: String::new(),
            comment: String::new(),
            working_dir: None,
            status: RunStatus::Saved,
            job_id: None,
            host: LOCALHOST.to_string(),
            interactive: false,
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            error: None,
            parent_run: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set label
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set an input binding
    #[must_use]
    pub fn with_input(mut self, name: impl Into<String>, binding: Binding) -> Self {
        self.inputs.insert(name.into(), binding);
        self
    }

    /// Set or replace an input binding
    pub fn set_input(&mut self, name: impl Into<String>, binding: Binding) {
        self.inputs.insert(name.into(), binding);
    }

    /// Set or replace an input pointer
    pub fn set_pointer(&mut self, name: impl Into<String>, pointer: Pointer) {
        self.inputs.insert(name.into(), Binding::Pointer(pointer));
    }

    /// Literal value of an input
    #[must_use]
    pub fn literal(&self, name: &str) -> Option<&ParamValue> {
        self.inputs.get(name).and_then(Binding::as_literal)
    }

    /// Input pointers in declaration order
    pub fn pointers(&self) -> impl Iterator<Item = (&str, &Pointer)> {
        self.inputs
            .iter()
            .filter_map(|(name, b)| b.as_pointer().map(|p| (name.as_str(), p)))
    }

    /// Ids of all output objects
    pub fn output_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.outputs.values().map(|o| o.object_id)
    }

    /// True for nested runs
    #[must_use]
    pub fn is_child(&self) -> bool {
        self.parent_run.is_some()
    }

    /// True while only defined
    #[must_use]
    pub fn is_saved(&self) -> bool {
        self.status == RunStatus::Saved
    }

    /// Label, or kind and id when unlabelled
    #[must_use]
    pub fn display_name(&self) -> String {
        if !self.label.is_empty() {
            return self.label.clone();
        }
        match self.id {
            Some(id) => format!("{}.{}", self.kind, id),
            None => self.kind.clone(),
        }
    }

    /// Working directory name for a given id
    #[must_use]
    pub fn working_dir_name(&self, id: ObjectId) -> String {
        format!("{}_{}", id.padded(), self.kind)
    }

    /// Absolute private snapshot path under `root`
    #[must_use]
    pub fn snapshot_path(&self, root: &Path) -> Option<PathBuf> {
        self.working_dir
            .as_ref()
            .map(|dir| root.join(dir).join(Self::SNAPSHOT_FILE))
    }

    /// Update status, stamping the change time
    pub fn set_status(&mut self, status: RunStatus) {
        self.status = status;
        self.updated_at = Timestamp::now();
    }

    /// Apply a polled status only if it moves the run forward
    pub fn advance_status(&mut self, status: RunStatus) -> bool {
        if self.status.can_advance_to(status) {
            self.set_status(status);
            true
        } else {
            false
        }
    }

    /// Mark failed with a cause
    pub fn set_failed(&mut self, cause: impl Into<String>) {
        self.error = Some(cause.into());
        self.set_status(RunStatus::Failed);
    }

    /// Mark aborted by the user
    pub fn set_aborted(&mut self) {
        self.set_status(RunStatus::Aborted);
    }

    /// Copy the definition (kind, inputs, host, comment) of another run
    pub fn copy_definition_from(&mut self, other: &Run) {
        self.kind = other.kind.clone();
        self.comment = other.comment.clone();
        self.host = other.host.clone();
        self.interactive = other.interactive;
        self.inputs = other.inputs.clone();
    }
}
