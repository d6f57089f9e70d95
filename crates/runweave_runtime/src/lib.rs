//! runweave runtime
//!
//! Hands runs to an execution gateway and observes them by polling.
//! The local gateway executes registered protocol handlers on tokio tasks
//! against each run's private snapshot store.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod gateway;
pub mod local;
pub mod registry;
pub mod sync;

pub use context::{HandlerResult, Outcome, RunContext};
pub use gateway::{ExecutionGateway, ExitInfo, GatewayError, GatewayResult, JobHandle, JobPoll, JobState, LaunchRequest};
pub use local::LocalGateway;
pub use registry::{KindDefinition, KindRegistry, ParamSpec, ProtocolHandler, ProtocolKind, RegistryError};
pub use sync::{RetryPolicy, retry_async, retry_with_backoff};
