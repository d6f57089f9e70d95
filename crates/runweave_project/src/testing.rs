//! Fixtures shared by the project tests.

use crate::config::{ControllerConfig, ProjectOptions};
use crate::project::Project;
use crate::registry::RunRegistry;
use async_trait::async_trait;
use runweave_core::{DataObject, Entity, ObjectId};
use runweave_runtime::{
    ExecutionGateway, ExitInfo, GatewayError, GatewayResult, HandlerResult, JobHandle, JobPoll, JobState,
    KindRegistry, LaunchRequest, LocalGateway, Outcome, ParamSpec, ProtocolHandler, ProtocolKind, RunContext,
};
use runweave_storage::{Backend, Batch, MemoryBackend, Store, StoreError, StoreResult};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Import;

impl ProtocolHandler for Import {
    fn execute(&self, ctx: &mut RunContext<'_>) -> HandlerResult {
        let count = ctx.literal("count").and_then(serde_json::Value::as_u64).unwrap_or(1);
        let set = ctx.define_output("volumes", DataObject::new("SetOfVolumes", "volumes"))?;
        for i in 0..count {
            ctx.add_item(set, DataObject::new("Volume", format!("volume{}", i)))?;
        }
        Ok(Outcome::Finished)
    }
}

struct Filter;

impl ProtocolHandler for Filter {
    fn execute(&self, ctx: &mut RunContext<'_>) -> HandlerResult {
        let Some(Entity::Data(input)) = ctx.input("input")? else {
            return Err("input is not a data object".into());
        };
        ctx.define_output(
            "filtered",
            DataObject::new("Volume", "filtered").with_attribute("source", input.name),
        )?;
        Ok(Outcome::Finished)
    }
}

struct Broken;

impl ProtocolHandler for Broken {
    fn execute(&self, ctx: &mut RunContext<'_>) -> HandlerResult {
        ctx.define_output("partial", DataObject::new("Volume", "partial"))?;
        Err("volume is corrupted".into())
    }
}

struct Pick;

impl ProtocolHandler for Pick {
    fn execute(&self, ctx: &mut RunContext<'_>) -> HandlerResult {
        if ctx.resumed() {
            ctx.define_output("approved", DataObject::new("SetOfCoordinates", "approved"))?;
            return Ok(Outcome::Finished);
        }
        ctx.define_output("picked", DataObject::new("SetOfCoordinates", "picked"))?;
        Ok(Outcome::AwaitApproval)
    }
}

pub(crate) fn kinds() -> Arc<KindRegistry> {
    let mut registry = KindRegistry::new();
    let kinds = [
        ProtocolKind::new("import", "Import")
            .with_param(ParamSpec::literal("count", 2))
            .with_handler(Arc::new(Import)),
        ProtocolKind::new("filter", "Filter")
            .with_param(ParamSpec::pointer("input"))
            .with_param(ParamSpec::literal("radius", 1.5))
            .with_handler(Arc::new(Filter)),
        ProtocolKind::new("broken", "Broken").with_handler(Arc::new(Broken)),
        ProtocolKind::new("pick", "Picking")
            .with_interactive(true)
            .with_handler(Arc::new(Pick)),
    ];
    for kind in kinds {
        registry.register(kind).unwrap();
    }
    Arc::new(registry)
}

fn quick_config() -> ControllerConfig {
    ControllerConfig::default()
        .with_poll_interval(Duration::from_millis(5))
        .with_sync_backoff(Duration::from_millis(1))
}

pub(crate) fn local_project(root: &Path) -> Project {
    let registry = kinds();
    let gateway = Arc::new(LocalGateway::new(Arc::clone(&registry)));
    Project::create(root, &ProjectOptions::default(), registry, gateway)
        .unwrap()
        .with_config(quick_config())
}

pub(crate) fn scripted_project(root: &Path, gateway: Arc<ScriptedGateway>) -> Project {
    Project::create(root, &ProjectOptions::default(), kinds(), gateway)
        .unwrap()
        .with_config(quick_config())
}

#[derive(Debug)]
struct Script {
    poll: JobPoll,
    fail_start: bool,
    fail_terminate: bool,
    poll_failures: usize,
    polls: usize,
    terminations: usize,
}

/// Gateway whose answers are set by the test
#[derive(Debug)]
pub(crate) struct ScriptedGateway {
    script: Mutex<Script>,
}

impl ScriptedGateway {
    pub(crate) fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                poll: JobPoll::running(),
                fail_start: false,
                fail_terminate: false,
                poll_failures: 0,
                polls: 0,
                terminations: 0,
            }),
        }
    }

    pub(crate) fn set_state(&self, state: JobState, exit: Option<ExitInfo>) {
        self.script.lock().unwrap().poll = JobPoll { state, exit };
    }

    pub(crate) fn fail_start(&self) {
        self.script.lock().unwrap().fail_start = true;
    }

    pub(crate) fn fail_terminate(&self) {
        self.script.lock().unwrap().fail_terminate = true;
    }

    /// The next `count` polls time out
    pub(crate) fn fail_polls(&self, count: usize) {
        self.script.lock().unwrap().poll_failures = count;
    }

    pub(crate) fn polls(&self) -> usize {
        self.script.lock().unwrap().polls
    }

    pub(crate) fn terminations(&self) -> usize {
        self.script.lock().unwrap().terminations
    }
}

#[async_trait]
impl ExecutionGateway for ScriptedGateway {
    async fn start(&self, _request: LaunchRequest) -> GatewayResult<JobHandle> {
        if self.script.lock().unwrap().fail_start {
            return Err(GatewayError::LaunchFailed("no slots on host".to_string()));
        }
        Ok(JobHandle::generate())
    }

    async fn poll(&self, _job: &JobHandle) -> GatewayResult<JobPoll> {
        let mut script = self.script.lock().unwrap();
        script.polls += 1;
        if script.poll_failures > 0 {
            script.poll_failures -= 1;
            return Err(GatewayError::Transport("timeout".to_string()));
        }
        Ok(script.poll.clone())
    }

    async fn terminate(&self, _job: &JobHandle) -> GatewayResult<()> {
        let mut script = self.script.lock().unwrap();
        script.terminations += 1;
        if script.fail_terminate {
            return Err(GatewayError::Transport("host unreachable".to_string()));
        }
        Ok(())
    }
}

/// In-memory backend whose commits fail while the switch is on
struct SwitchedBackend {
    inner: MemoryBackend,
    fail: Arc<AtomicBool>,
}

impl Backend for SwitchedBackend {
    fn load(&self, id: ObjectId) -> StoreResult<Option<Vec<u8>>> {
        self.inner.load(id)
    }
    fn scan(&self) -> StoreResult<Vec<(ObjectId, Vec<u8>)>> {
        self.inner.scan()
    }
    fn next_id(&self) -> StoreResult<u64> {
        self.inner.next_id()
    }
    fn apply(&mut self, batch: &Batch) -> StoreResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::backend("commit transaction", "disk full"));
        }
        self.inner.apply(batch)
    }
}

/// Swap the project store for an empty in-memory one; commits fail while the returned switch is set
pub(crate) fn failing_commits(project: &mut Project) -> Arc<AtomicBool> {
    let fail = Arc::new(AtomicBool::new(false));
    let backend = SwitchedBackend {
        inner: MemoryBackend::new(),
        fail: Arc::clone(&fail),
    };
    project.registry = RunRegistry::new(Store::new(Box::new(backend)).unwrap());
    fail
}
