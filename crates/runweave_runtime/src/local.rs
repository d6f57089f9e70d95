//! In-process execution gateway.
//!
//! Each job runs its kind's handler on the blocking pool against the run's
//! private snapshot store. The store is closed before the job is reported
//! as done, so a finished job's snapshot can be reopened by the project.

use crate::context::{Outcome, RunContext};
use crate::gateway::{ExecutionGateway, ExitInfo, GatewayError, GatewayResult, JobHandle, JobPoll, JobState, LaunchRequest};
use crate::registry::{KindRegistry, ProtocolHandler};
use async_trait::async_trait;
use runweave_core::{ObjectId, RunStatus};
use runweave_storage::Store;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::AbortHandle;
use tracing::{info, warn};

struct JobEntry {
    run_id: ObjectId,
    poll: JobPoll,
    abort: Option<AbortHandle>,
}

/// Gateway executing registered handlers on tokio tasks
#[derive(Clone)]
pub struct LocalGateway {
    registry: Arc<KindRegistry>,
    jobs: Arc<RwLock<HashMap<JobHandle, JobEntry>>>,
}

impl LocalGateway {
    /// Gateway over a kind registry
    #[must_use]
    pub fn new(registry: Arc<KindRegistry>) -> Self {
        Self {
            registry,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Jobs still running
    pub async fn running_jobs(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|e| e.poll.state == JobState::Running)
            .count()
    }

    /// Run id behind a job
    pub async fn run_of(&self, job: &JobHandle) -> Option<ObjectId> {
        self.jobs.read().await.get(job).map(|e| e.run_id)
    }
}

impl std::fmt::Debug for LocalGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalGateway")
            .field("kinds", &self.registry.len())
            .finish()
    }
}

/// Execute one run to completion against its private store
fn execute_run(request: &LaunchRequest, handler: &dyn ProtocolHandler) -> Result<(), String> {
    let mut store = Store::open(&request.db_path).map_err(|e| e.to_string())?;
    let mut run = store.get_run(request.run_id).map_err(|e| e.to_string())?;
    run.set_status(RunStatus::Running);
    run.error = None;
    store.put_run(&mut run).map_err(|e| e.to_string())?;
    store.commit().map_err(|e| e.to_string())?;

    let committed_outputs = run.outputs.clone();
    let outcome = {
        let mut ctx = RunContext::new(&mut store, &mut run, &request.working_dir, &request.host, request.resume);
        handler.execute(&mut ctx)
    };

    let result = match outcome {
        Ok(Outcome::Finished) => {
            run.set_status(RunStatus::Finished);
            Ok(())
        }
        Ok(Outcome::AwaitApproval) => {
            run.set_status(RunStatus::WaitingApproval);
            Ok(())
        }
        Err(e) => {
            store.rollback();
            run.outputs = committed_outputs;
            run.set_failed(e.to_string());
            Err(e.to_string())
        }
    };
    store.put_run(&mut run).map_err(|e| e.to_string())?;
    store.commit().map_err(|e| e.to_string())?;
    result
}

#[async_trait]
impl ExecutionGateway for LocalGateway {
    async fn start(&self, request: LaunchRequest) -> GatewayResult<JobHandle> {
        let kind = self
            .registry
            .get(&request.kind)
            .ok_or_else(|| GatewayError::UnknownKind(request.kind.clone()))?;
        let handler = kind
            .handler
            .clone()
            .ok_or_else(|| GatewayError::NoHandler(request.kind.clone()))?;

        let job = JobHandle::generate();
        let run_id = request.run_id;
        self.jobs.write().await.insert(
            job.clone(),
            JobEntry {
                run_id,
                poll: JobPoll::running(),
                abort: None,
            },
        );
        info!(run = %run_id, kind = %request.kind, job = %job, "Starting local job");

        let jobs = Arc::clone(&self.jobs);
        let key = job.clone();
        let task = tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || execute_run(&request, handler.as_ref())).await;
            let poll = match result {
                Ok(Ok(())) => JobPoll {
                    state: JobState::Finished,
                    exit: Some(ExitInfo::success()),
                },
                Ok(Err(msg)) => {
                    warn!(run = %run_id, error = %msg, "Local job failed");
                    JobPoll {
                        state: JobState::Failed,
                        exit: Some(ExitInfo::failure(msg)),
                    }
                }
                Err(join) => JobPoll {
                    state: JobState::Failed,
                    exit: Some(ExitInfo::failure(format!("execution aborted: {}", join))),
                },
            };
            if let Some(entry) = jobs.write().await.get_mut(&key) {
                if entry.poll.state == JobState::Running {
                    entry.poll = poll;
                }
            }
        });

        if let Some(entry) = self.jobs.write().await.get_mut(&job) {
            entry.abort = Some(task.abort_handle());
        }
        Ok(job)
    }

    async fn poll(&self, job: &JobHandle) -> GatewayResult<JobPoll> {
        self.jobs
            .read()
            .await
            .get(job)
            .map(|e| e.poll.clone())
            .ok_or_else(|| GatewayError::UnknownJob(job.to_string()))
    }

    async fn terminate(&self, job: &JobHandle) -> GatewayResult<()> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(job)
            .ok_or_else(|| GatewayError::UnknownJob(job.to_string()))?;
        if let Some(abort) = entry.abort.take() {
            abort.abort();
        }
        if entry.poll.state == JobState::Running {
            entry.poll = JobPoll {
                state: JobState::Failed,
                exit: Some(ExitInfo::failure("terminated by user")),
            };
        }
        info!(run = %entry.run_id, job = %job, "Local job terminated");
        Ok(())
    }
}
