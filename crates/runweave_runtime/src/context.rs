//! What a protocol handler sees while executing.

use runweave_core::{DataObject, Entity, HostConfig, ObjectId, OutputBinding, ParamValue, PointerResolver, Run};
use runweave_storage::{Store, StoreResult};
use std::path::Path;
use tracing::info;

/// How a handler ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Work is complete
    Finished,
    /// Work paused until the user approves and continues the run
    AwaitApproval,
}

/// Handler result; errors fail the run
pub type HandlerResult = Result<Outcome, Box<dyn std::error::Error + Send + Sync>>;

/// Execution context over the run's private store
pub struct RunContext<'a> {
    store: &'a mut Store,
    run: &'a mut Run,
    working_dir: &'a Path,
    host: &'a HostConfig,
    resumed: bool,
}

impl<'a> RunContext<'a> {
    /// Build a context
    pub fn new(
        store: &'a mut Store,
        run: &'a mut Run,
        working_dir: &'a Path,
        host: &'a HostConfig,
        resumed: bool,
    ) -> Self {
        Self {
            store,
            run,
            working_dir,
            host,
            resumed,
        }
    }

    /// The executing run
    #[must_use]
    pub fn run(&self) -> &Run {
        &*self.run
    }

    /// Absolute working directory
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        self.working_dir
    }

    /// Target host
    #[must_use]
    pub fn host(&self) -> &HostConfig {
        self.host
    }

    /// True when continuing after an approval pause
    #[must_use]
    pub fn resumed(&self) -> bool {
        self.resumed
    }

    /// Literal input value
    #[must_use]
    pub fn literal(&self, name: &str) -> Option<&ParamValue> {
        self.run.literal(name)
    }

    /// Entity an input pointer designates
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    pub fn input(&self, name: &str) -> StoreResult<Option<Entity>> {
        let Some(pointer) = self.run.inputs.get(name).and_then(|b| b.as_pointer()) else {
            return Ok(None);
        };
        match self.store.resolve(pointer) {
            Some(id) => self.store.find(id),
            None => Ok(None),
        }
    }

    /// Register a top-level output
    ///
    /// # Errors
    ///
    /// Returns error if the object cannot be staged
    pub fn define_output(&mut self, name: &str, mut object: DataObject) -> StoreResult<ObjectId> {
        object.name = name.to_string();
        object.parent = None;
        let type_name = object.type_name.clone();
        let id = self.store.put_data(&mut object)?;
        self.run
            .outputs
            .insert(name.to_string(), OutputBinding::new(id, type_name));
        info!(run = ?self.run.id, output = name, object = %id, "Output registered");
        Ok(id)
    }

    /// Register a sub-object of an output
    ///
    /// # Errors
    ///
    /// Returns error if the object cannot be staged
    pub fn add_item(&mut self, parent: ObjectId, object: DataObject) -> StoreResult<ObjectId> {
        let mut object = object.with_parent(parent);
        self.store.put_data(&mut object)
    }
}
