//! External execution gateway.
//!
//! The controller never computes anything itself: it starts a job for a
//! run, polls it, and may ask for termination.

use async_trait::async_trait;
use runweave_core::{HostConfig, ObjectId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Gateway result type
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Gateway errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// No kind registered under this name
    #[error("Unknown protocol kind: {0}")]
    UnknownKind(String),

    /// Kind is declared but cannot be executed here
    #[error("Protocol kind {0} has no handler")]
    NoHandler(String),

    /// Handle not issued by this gateway, or already forgotten
    #[error("Unknown job: {0}")]
    UnknownJob(String),

    /// The job could not be started
    #[error("Launch failed: {0}")]
    LaunchFailed(String),

    /// Talking to the host failed
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Opaque job handle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    /// Fresh random handle
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Handle from a stored string
    #[must_use]
    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// String form
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a gateway needs to execute a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Run to execute
    pub run_id: ObjectId,
    /// Its protocol kind
    pub kind: String,
    /// Absolute working directory
    pub working_dir: PathBuf,
    /// Absolute path of the run's private snapshot store
    pub db_path: PathBuf,
    /// Target host
    pub host: HostConfig,
    /// Continuing after an interactive pause
    pub resume: bool,
}

/// Coarse job state as seen by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Still executing
    Running,
    /// Exited cleanly
    Finished,
    /// Exited with an error, crashed or was terminated
    Failed,
}

/// Exit details, once known
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    /// Exit code, when the host reports one
    pub code: Option<i32>,
    /// Human readable cause
    pub message: Option<String>,
}

impl ExitInfo {
    /// Clean exit
    #[must_use]
    pub fn success() -> Self {
        Self {
            code: Some(0),
            message: None,
        }
    }

    /// Failed exit with a cause
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            code: Some(1),
            message: Some(message.into()),
        }
    }
}

/// Result of a poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPoll {
    /// Current state
    pub state: JobState,
    /// Exit details for finished jobs
    pub exit: Option<ExitInfo>,
}

impl JobPoll {
    /// Running, no exit yet
    #[must_use]
    pub fn running() -> Self {
        Self {
            state: JobState::Running,
            exit: None,
        }
    }
}

/// Starts, polls and terminates external work
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// Start executing a run
    async fn start(&self, request: LaunchRequest) -> GatewayResult<JobHandle>;

    /// Current state of a job
    async fn poll(&self, job: &JobHandle) -> GatewayResult<JobPoll>;

    /// Ask a job to stop; the computation may not halt immediately
    async fn terminate(&self, job: &JobHandle) -> GatewayResult<()>;
}
