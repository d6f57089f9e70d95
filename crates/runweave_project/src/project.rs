//! Project context.
//!
//! A `Project` owns everything one project directory needs: its entity
//! store (through the run registry), settings, hosts, the protocol kinds it
//! can instantiate and the gateway that executes them. Graph views are
//! rebuilt from the store on every call.

use crate::config::{ControllerConfig, ProjectOptions};
use crate::error::{ProjectError, ProjectResult};
use crate::label::next_label;
use crate::paths::ProjectPaths;
use crate::registry::RunRegistry;
use runweave_core::{
    Binding, HostConfig, HostsConfig, ObjectId, Pointer, ProjectSettings, RELATION_SOURCE, RELATION_TRANSFORM, Run,
};
use runweave_plan::{GraphBuilder, ObjectGraph, RunsGraph, build_relation_graph};
use runweave_runtime::{ExecutionGateway, KindRegistry};
use runweave_storage::Store;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which side of a relation to follow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationDirection {
    /// Objects derived from the given one
    Children,
    /// Objects the given one derives from
    Parents,
}

/// An open project
pub struct Project {
    pub(crate) paths: ProjectPaths,
    pub(crate) registry: RunRegistry,
    pub(crate) settings: ProjectSettings,
    pub(crate) hosts: HostsConfig,
    pub(crate) kinds: Arc<KindRegistry>,
    pub(crate) gateway: Arc<dyn ExecutionGateway>,
    pub(crate) config: ControllerConfig,
}

impl Project {
    /// Create a project in `path`, replacing any earlier project data there
    ///
    /// # Errors
    ///
    /// Returns error if the layout, store or settings cannot be written
    pub fn create(
        path: impl Into<PathBuf>,
        options: &ProjectOptions,
        kinds: Arc<KindRegistry>,
        gateway: Arc<dyn ExecutionGateway>,
    ) -> ProjectResult<Self> {
        let paths = ProjectPaths::new(path);
        paths.clean()?;
        paths.make_dirs()?;
        if let Some(hosts_file) = &options.hosts_file {
            let target = paths.hosts_file();
            std::fs::copy(hosts_file, &target).map_err(|e| ProjectError::io(hosts_file, e))?;
        }

        let store = Store::open_with(paths.store_config(), paths.root())?;
        let mut settings = ProjectSettings::new()
            .with_read_only(options.read_only)
            .with_life_time(options.life_time_days);
        if let Some(view) = options.runs_view {
            settings = settings.with_runs_view(view);
        }
        settings.save(&paths.settings())?;
        let hosts = Self::load_hosts(&paths);
        info!(path = %paths.root().display(), "Project created");

        Ok(Self {
            paths,
            registry: RunRegistry::new(store),
            settings,
            hosts,
            kinds,
            gateway,
            config: ControllerConfig::default(),
        })
    }

    /// Open an existing project
    ///
    /// # Errors
    ///
    /// Returns `NotAProject` if the directory holds no store
    pub fn load(
        path: impl Into<PathBuf>,
        kinds: Arc<KindRegistry>,
        gateway: Arc<dyn ExecutionGateway>,
    ) -> ProjectResult<Self> {
        let paths = ProjectPaths::new(path);
        if !paths.is_project() {
            return Err(ProjectError::NotAProject {
                path: paths.root().to_path_buf(),
            });
        }
        let store = Store::open(&paths.db())?;
        let settings = match ProjectSettings::load(&paths.settings()) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Project settings unreadable, using defaults");
                ProjectSettings::new()
            }
        };
        let hosts = Self::load_hosts(&paths);
        debug!(path = %paths.root().display(), read_only = settings.read_only, "Project loaded");

        Ok(Self {
            paths,
            registry: RunRegistry::new(store),
            settings,
            hosts,
            kinds,
            gateway,
            config: ControllerConfig::default(),
        })
    }

    fn load_hosts(paths: &ProjectPaths) -> HostsConfig {
        let file = paths.hosts_file();
        if !file.is_file() {
            return HostsConfig::default();
        }
        HostsConfig::load(&file).unwrap_or_else(|e| {
            warn!(error = %e, "Hosts file unreadable, using localhost");
            HostsConfig::default()
        })
    }

    /// Replace the controller configuration
    #[must_use]
    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Controller configuration
    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Project directory
    #[must_use]
    pub fn root(&self) -> &Path {
        self.paths.root()
    }

    /// Directory layout
    #[must_use]
    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    /// Registered protocol kinds
    #[must_use]
    pub fn kinds(&self) -> &KindRegistry {
        &self.kinds
    }

    /// Entity store
    #[must_use]
    pub fn store(&self) -> &Store {
        self.registry.store()
    }

    // Settings

    /// Current settings
    #[must_use]
    pub fn settings(&self) -> &ProjectSettings {
        &self.settings
    }

    /// True when mutations are refused
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.settings.read_only
    }

    /// Toggle read-only mode; always written
    ///
    /// # Errors
    ///
    /// Returns error if the settings file cannot be written
    pub fn set_read_only(&mut self, read_only: bool) -> ProjectResult<()> {
        self.settings.read_only = read_only;
        self.settings.save(&self.paths.settings())?;
        info!(read_only, "Project read-only mode changed");
        Ok(())
    }

    /// Remember the runs view
    ///
    /// # Errors
    ///
    /// Returns error if the settings file cannot be written
    pub fn set_runs_view(&mut self, view: u32) -> ProjectResult<()> {
        self.settings.runs_view = view;
        self.save_settings()
    }

    /// Persist settings unless the project is read-only
    ///
    /// # Errors
    ///
    /// Returns error if the settings file cannot be written
    pub fn save_settings(&self) -> ProjectResult<()> {
        if self.is_read_only() {
            debug!("Read-only project, settings not saved");
            return Ok(());
        }
        Ok(self.settings.save(&self.paths.settings())?)
    }

    /// Time since the project was created
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.settings.elapsed()
    }

    /// Remaining lifetime, `None` when unlimited
    #[must_use]
    pub fn time_left(&self) -> Option<chrono::Duration> {
        self.settings.time_left()
    }

    // Hosts

    /// Configured host names
    #[must_use]
    pub fn host_names(&self) -> Vec<String> {
        self.hosts.names()
    }

    /// Host configuration, falling back to the first host
    #[must_use]
    pub fn host_config(&self, name: &str) -> HostConfig {
        self.hosts.resolve(name)
    }

    // Runs

    /// Fresh unsaved run of a kind, with default inputs and an automatic label
    ///
    /// # Errors
    ///
    /// Returns `InvalidRunKind` if the kind is not registered
    pub fn new_run(&self, kind: &str) -> ProjectResult<Run> {
        let protocol = self.kinds.get(kind).ok_or_else(|| ProjectError::InvalidRunKind {
            kind: kind.to_string(),
        })?;
        let mut run = Run::new(kind);
        run.interactive = protocol.definition.interactive;
        for param in &protocol.definition.params {
            if param.pointer {
                run.set_pointer(&param.name, Pointer::empty());
            } else if let Some(default) = &param.default {
                run.set_input(&param.name, Binding::Literal(default.clone()));
            }
        }
        let previous = self.registry.by_kind(kind)?.last().map(|r| r.label.clone());
        run.label = next_label(previous.as_deref(), protocol.label());
        Ok(run)
    }

    /// Run by id
    ///
    /// # Errors
    ///
    /// Returns `InvalidRun` if the id is not a run
    pub fn get_run(&self, id: ObjectId) -> ProjectResult<Run> {
        self.registry.get(id)
    }

    /// Top-level runs; with `refresh`, active ones are synced first
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read or written
    pub async fn runs(&mut self, refresh: bool) -> ProjectResult<Vec<Run>> {
        if refresh {
            return self.refresh_runs().await;
        }
        self.registry.list(false)
    }

    // Graphs

    /// Fresh dependency graph of the top-level runs
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    pub fn runs_graph(&self) -> ProjectResult<RunsGraph> {
        Ok(GraphBuilder::from_store(self.registry.store())?)
    }

    /// Provenance graph of `source` relations
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    pub fn source_graph(&self) -> ProjectResult<ObjectGraph> {
        Ok(build_relation_graph(self.registry.store(), RELATION_SOURCE)?)
    }

    /// Provenance graph of `transform` relations
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    pub fn transform_graph(&self) -> ProjectResult<ObjectGraph> {
        Ok(build_relation_graph(self.registry.store(), RELATION_TRANSFORM)?)
    }

    /// Objects directly derived from `object`
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    pub fn source_children(&self, object: ObjectId) -> ProjectResult<Vec<ObjectId>> {
        let graph = self.source_graph()?;
        Ok(graph
            .node(object)
            .map(|n| n.children.iter().copied().collect())
            .unwrap_or_default())
    }

    /// Objects `object` is directly derived from
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    pub fn source_parents(&self, object: ObjectId) -> ProjectResult<Vec<ObjectId>> {
        let graph = self.source_graph()?;
        Ok(graph
            .node(object)
            .map(|n| n.parents.iter().copied().collect())
            .unwrap_or_default())
    }

    /// Direct relatives of `object` inside its connected component
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    pub fn related_objects(
        &self,
        relation: &str,
        object: ObjectId,
        direction: RelationDirection,
    ) -> ProjectResult<Vec<ObjectId>> {
        let graph = build_relation_graph(self.registry.store(), relation)?;
        let connected = graph.connected_objects(object);
        let Some(node) = graph.node(object) else {
            return Ok(Vec::new());
        };
        let candidates = match direction {
            RelationDirection::Children => &node.children,
            RelationDirection::Parents => &node.parents,
        };
        Ok(candidates
            .iter()
            .filter(|id| connected.contains(*id))
            .copied()
            .collect())
    }
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("root", &self.paths.root())
            .field("read_only", &self.settings.read_only)
            .field("kinds", &self.kinds.len())
            .finish()
    }
}
