//! Run lifecycle controller.
//!
//! Every mutating operation on runs goes through here. Preconditions
//! (read-only mode, dependents, kind, status, graph validity) are checked
//! against a freshly built dependency graph before anything is written.
//! Execution failures are recorded on the run, not returned.

use crate::error::{ProjectError, ProjectResult};
use crate::paths::RUNS_DIR;
use crate::project::Project;
use crate::workflow::io_matches;
use indexmap::IndexMap;
use runweave_core::{CoreError, ObjectId, Pointer, Run, RunStatus};
use runweave_plan::Validator;
use runweave_runtime::{GatewayError, JobHandle, JobPoll, JobState, LaunchRequest, retry_async, retry_with_backoff};
use runweave_storage::{RelationIndex, RunSnapshot, derive_relations};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Result of a group delete
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// Runs removed
    pub deleted: Vec<ObjectId>,
    /// Runs that remain, with the reason
    pub failed: Vec<(ObjectId, String)>,
}

impl DeleteReport {
    /// True when every requested run was removed
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

fn persisted_id(run: &Run) -> ProjectResult<ObjectId> {
    run.id.ok_or_else(|| {
        CoreError::Validation {
            field: "id".to_string(),
            reason: format!("run {} has never been saved", run.display_name()),
        }
        .into()
    })
}

impl Project {
    pub(crate) fn check_writable(&self, action: &str) -> ProjectResult<()> {
        if self.is_read_only() {
            return Err(ProjectError::ReadOnly {
                action: action.to_string(),
            });
        }
        Ok(())
    }

    /// Run `f`; its staged writes are dropped if it fails
    pub(crate) fn transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> ProjectResult<T>) -> ProjectResult<T> {
        let result = f(self);
        if result.is_err() {
            self.registry.rollback();
        }
        result
    }

    fn persist(&mut self, run: &mut Run) -> ProjectResult<ObjectId> {
        self.transaction(|project| {
            let id = project.registry.store_run(run)?;
            project.registry.commit()?;
            Ok(id)
        })
    }

    /// Refuse when read-only or when a non-saved run outside `runs` depends on one inside
    ///
    /// # Errors
    ///
    /// Returns `ReadOnly` or `Dependencies`
    pub fn check_modification_allowed(&self, runs: &[ObjectId], action: &str) -> ProjectResult<()> {
        self.check_writable(action)?;
        let offenders = self.runs_graph()?.dependents_outside(runs);
        if !offenders.is_empty() {
            return Err(ProjectError::Dependencies {
                action: action.to_string(),
                offenders,
            });
        }
        Ok(())
    }

    fn validate_run(&self, run: &Run) -> ProjectResult<()> {
        let runs = self.registry.list(false)?;
        Validator::new(self.registry.store()).validate(run, &runs)?;
        Ok(())
    }

    /// Persist a run definition as Saved
    ///
    /// # Errors
    ///
    /// Returns a precondition error, or `CannotSave` while the run is
    /// launched, running or finished
    pub fn save_run(&mut self, run: &mut Run) -> ProjectResult<ObjectId> {
        match run.id {
            Some(id) => self.check_modification_allowed(&[id], "save")?,
            None => self.check_writable("save")?,
        }
        if run.id.is_some() && matches!(run.status, RunStatus::Launched | RunStatus::Running | RunStatus::Finished) {
            return Err(ProjectError::CannotSave {
                run: run.display_name(),
                status: run.status,
            });
        }
        self.validate_run(run)?;
        let before = run.clone();
        run.set_status(RunStatus::Saved);
        let id = restore_on_error(run, before, |run| self.persist(run))?;
        info!(run = %id, label = %run.label, "Run saved");
        Ok(id)
    }

    /// Launch a run; with `wait`, poll until the job ends and sync the result
    ///
    /// # Errors
    ///
    /// Returns a precondition error; gateway failures are recorded on the run
    pub async fn launch(&mut self, run: &mut Run, wait: bool) -> ProjectResult<()> {
        self.launch_inner(run, wait, false).await
    }

    async fn launch_inner(&mut self, run: &mut Run, wait: bool, resume: bool) -> ProjectResult<()> {
        match run.id {
            // Interactive runs are relaunched while their dependents exist.
            Some(id) if !run.interactive => self.check_modification_allowed(&[id], "launch")?,
            _ => self.check_writable("launch")?,
        }
        if !self.kinds.contains(&run.kind) {
            return Err(ProjectError::InvalidRunKind { kind: run.kind.clone() });
        }
        if run.status.is_active() {
            return Err(ProjectError::CannotLaunch {
                run: run.display_name(),
                status: run.status,
            });
        }
        self.validate_run(run)?;

        let before = run.clone();
        let run_id = restore_on_error(run, before, |run| {
            self.transaction(|project| {
                if !resume {
                    project.registry.remove_outputs(run)?;
                    run.outputs.clear();
                }
                run.set_status(RunStatus::Launched);
                run.error = None;
                run.job_id = None;
                let id = project.registry.store_run(run)?;
                project.registry.commit()?;
                Ok(id)
            })
        })?;

        let relative = run
            .working_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(RUNS_DIR).join(run.working_dir_name(run_id)));
        let working_dir = self.paths.absolute(&relative);
        let db_path = working_dir.join(Run::SNAPSHOT_FILE);
        if let Err(e) = self.write_run_files(&working_dir, &db_path, resume) {
            error!(run = %run_id, error = %e, "Run files not written");
            run.set_failed(format!("Cannot prepare run: {}", e));
            self.persist(run)?;
            return Ok(());
        }

        let request = LaunchRequest {
            run_id,
            kind: run.kind.clone(),
            working_dir,
            db_path,
            host: self.hosts.resolve(&run.host),
            resume,
        };
        match self.gateway.start(request).await {
            Ok(job) => {
                info!(run = %run_id, job = %job, resume, "Run launched");
                run.job_id = Some(job.to_string());
            }
            Err(e) => {
                error!(run = %run_id, error = %e, "Launch failed");
                run.set_failed(e.to_string());
            }
        }
        self.persist(run)?;

        if wait && run.status.is_active() {
            self.wait_for(run).await?;
        }
        Ok(())
    }

    fn write_run_files(&self, working_dir: &Path, db_path: &Path, resume: bool) -> ProjectResult<()> {
        if !resume && working_dir.exists() {
            std::fs::remove_dir_all(working_dir).map_err(|e| ProjectError::io(working_dir, e))?;
        }
        if let Some(logs) = db_path.parent() {
            std::fs::create_dir_all(logs).map_err(|e| ProjectError::io(logs, e))?;
        }
        self.registry.store().snapshot_to(db_path)?;
        Ok(())
    }

    /// Poll a job with retries; `None` once the gateway no longer knows it
    async fn poll_job(&self, job: &JobHandle) -> Result<Option<JobPoll>, GatewayError> {
        let gateway = &self.gateway;
        retry_async(self.config.retry_policy(), "poll job", || async move {
            match gateway.poll(job).await {
                Ok(poll) => Ok(Some(poll)),
                Err(GatewayError::UnknownJob(_)) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn wait_for(&mut self, run: &mut Run) -> ProjectResult<()> {
        if let Some(job) = run.job_id.clone().map(JobHandle::from_string) {
            loop {
                match self.poll_job(&job).await {
                    Ok(Some(poll)) if poll.state == JobState::Running => {
                        tokio::time::sleep(self.config.poll_interval).await;
                    }
                    Ok(_) => break,
                    Err(e) => {
                        warn!(run = ?run.id, job = %job, error = %e, "Job unreachable, run left as is");
                        return Ok(());
                    }
                }
            }
        }
        self.sync_run(run).await
    }

    /// Stop an executing or paused run
    ///
    /// The run is marked aborted even when the gateway cannot terminate it.
    /// In a read-only project the job is still terminated but nothing is written.
    ///
    /// # Errors
    ///
    /// Returns `CannotStop` for runs that are not executing or paused, or
    /// the gateway error after the abort was recorded
    pub async fn stop(&mut self, run: &mut Run) -> ProjectResult<()> {
        if !(run.status.is_active() || run.status.is_interactive()) {
            return Err(ProjectError::CannotStop {
                run: run.display_name(),
                status: run.status,
            });
        }
        let mut outcome = Ok(());
        if let Some(job) = run.job_id.clone().map(JobHandle::from_string) {
            if let Err(e) = self.gateway.terminate(&job).await {
                warn!(run = ?run.id, job = %job, error = %e, "Terminate failed");
                outcome = Err(e.into());
            }
        }
        run.set_aborted();
        if self.is_read_only() {
            debug!(run = ?run.id, "Read-only project, abort not persisted");
            return outcome;
        }
        self.persist(run)?;
        info!(run = ?run.id, "Run stopped");
        outcome
    }

    /// Resume a run paused for interaction
    ///
    /// # Errors
    ///
    /// Returns `CannotContinue` unless the run is interactive or waiting for approval
    pub async fn continue_run(&mut self, run: &mut Run, wait: bool) -> ProjectResult<()> {
        if !run.status.is_interactive() {
            return Err(ProjectError::CannotContinue {
                run: run.display_name(),
                status: run.status,
            });
        }
        run.set_status(RunStatus::Interactive);
        self.launch_inner(run, wait, true).await
    }

    /// Sync every active top-level run and return the top-level runs
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read or written
    pub async fn refresh_runs(&mut self) -> ProjectResult<Vec<Run>> {
        let mut runs = self.registry.list(false)?;
        for run in runs.iter_mut().filter(|r| r.status.is_active()) {
            self.sync_run(run).await?;
        }
        Ok(runs)
    }

    /// Pull an active run's status and outputs from its job and private snapshot
    ///
    /// Status only moves forward. An unreachable gateway leaves the run as it
    /// is; a job that ended without a readable snapshot fails the run with the
    /// cause attached.
    ///
    /// # Errors
    ///
    /// Returns error if the project store cannot be written
    pub async fn sync_run(&mut self, run: &mut Run) -> ProjectResult<()> {
        if self.is_read_only() {
            debug!(run = ?run.id, "Read-only project, sync skipped");
            return Ok(());
        }
        if !run.status.is_active() {
            return Ok(());
        }
        let run_id = persisted_id(run)?;

        let poll = match run.job_id.clone().map(JobHandle::from_string) {
            Some(job) => match self.poll_job(&job).await {
                Ok(poll) => poll,
                Err(e) => {
                    warn!(run = %run_id, error = %e, "Job unreachable, status left unchanged");
                    return Ok(());
                }
            },
            None => None,
        };
        if poll.as_ref().is_some_and(|p| p.state == JobState::Running) {
            if run.advance_status(RunStatus::Running) {
                self.persist(run)?;
            }
            return Ok(());
        }

        let snapshot = match run.snapshot_path(self.paths.root()) {
            Some(db_path) => Some(
                retry_with_backoff(self.config.retry_policy(), "read run snapshot", || {
                    RunSnapshot::read(&db_path, run_id)
                })
                .await,
            ),
            None => None,
        };

        let before = run.clone();
        restore_on_error(run, before, |run| {
            self.transaction(|project| {
                match snapshot {
                    Some(Ok(snapshot)) => project.merge_snapshot(run, snapshot)?,
                    Some(Err(e)) => run.set_failed(format!("Cannot read run snapshot: {}", e)),
                    None => run.set_failed("Run has no working directory"),
                }
                if run.status.is_active() {
                    run.set_failed(exit_cause(poll));
                }
                project.registry.store_run(run)?;
                project.registry.commit()
            })
        })?;
        info!(run = %run_id, status = %run.status, "Run synced");
        Ok(())
    }

    fn merge_snapshot(&mut self, run: &mut Run, snapshot: RunSnapshot) -> ProjectResult<()> {
        let RunSnapshot { run: recorded, objects } = snapshot;
        if !run.advance_status(recorded.status) {
            debug!(run = ?run.id, current = %run.status, recorded = %recorded.status, "Older status ignored");
        }
        if recorded.error.is_some() {
            run.error = recorded.error;
        }

        self.registry.remove_outputs(run)?;
        let store = self.registry.store_mut();
        let mut remap: HashMap<ObjectId, ObjectId> = HashMap::new();
        // Objects come parents first, so parents are already remapped.
        for mut object in objects {
            let Some(old) = object.id.take() else {
                continue;
            };
            object.parent = object.parent.and_then(|p| remap.get(&p).copied());
            let new = store.put_data(&mut object)?;
            remap.insert(old, new);
        }
        run.outputs = recorded
            .outputs
            .into_iter()
            .filter_map(|(name, mut output)| {
                let id = remap.get(&output.object_id)?;
                output.object_id = *id;
                Some((name, output))
            })
            .collect();

        for relation in derive_relations(run, store) {
            store.insert_relation(relation)?;
        }
        Ok(())
    }

    /// Delete runs with their outputs, relations and working directories
    ///
    /// Ids that are not runs are reported and skipped; the others are
    /// removed together or not at all.
    ///
    /// # Errors
    ///
    /// Returns `ReadOnly` or `Dependencies` before anything is deleted, or a
    /// store error after every staged removal was dropped
    pub fn delete_runs(&mut self, runs: &[ObjectId]) -> ProjectResult<DeleteReport> {
        self.check_modification_allowed(runs, "delete")?;
        let mut report = DeleteReport::default();
        let mut targets = Vec::new();
        for &id in runs {
            match self.registry.get(id) {
                Ok(run) => targets.push(run),
                Err(e) => {
                    warn!(run = %id, error = %e, "Run not deleted");
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        self.transaction(|project| {
            for run in &targets {
                project.registry.remove(persisted_id(run)?)?;
            }
            project.registry.commit()
        })?;

        for run in targets {
            report.deleted.extend(run.id);
            let Some(dir) = run.working_dir.filter(|d| d.starts_with(RUNS_DIR)) else {
                continue;
            };
            let path = self.paths.absolute(&dir);
            if path.exists() {
                if let Err(e) = std::fs::remove_dir_all(&path) {
                    warn!(path = %path.display(), error = %e, "Working directory not removed");
                }
            }
        }
        info!(deleted = report.deleted.len(), failed = report.failed.len(), "Runs deleted");
        Ok(report)
    }

    /// Unsaved copy of a run's definition with a fresh label
    ///
    /// # Errors
    ///
    /// Returns `InvalidRunKind` if the kind is no longer registered
    pub fn copy_run(&self, run: &Run) -> ProjectResult<Run> {
        let mut copy = self.new_run(&run.kind)?;
        copy.copy_definition_from(run);
        Ok(copy)
    }

    /// Copy and save runs; pointers between copied runs follow the copies
    ///
    /// # Errors
    ///
    /// Returns a precondition error, or `InvalidRun` for unknown ids; nothing
    /// is saved when any copy fails
    pub fn copy_runs(&mut self, runs: &[ObjectId]) -> ProjectResult<Vec<Run>> {
        self.check_writable("copy")?;
        let graph = self.runs_graph()?;
        let originals: Vec<Run> = runs.iter().map(|id| self.get_run(*id)).collect::<ProjectResult<_>>()?;

        let out = self.transaction(|project| {
            let mut copies: IndexMap<ObjectId, Run> = IndexMap::new();
            for original in &originals {
                let mut copy = project.copy_run(original)?;
                project.registry.setup(&mut copy)?;
                copies.insert(persisted_id(original)?, copy);
            }

            for parent in &originals {
                let parent_id = persisted_id(parent)?;
                let Some(new_parent) = copies.get(&parent_id).and_then(|c| c.id) else {
                    continue;
                };
                for child_id in graph.children_of(parent_id) {
                    let Some(child) = originals.iter().find(|r| r.id == Some(child_id)) else {
                        continue;
                    };
                    let matches = io_matches(project.registry.store(), parent, child);
                    if let Some(copy) = copies.get_mut(&child_id) {
                        for (output, input) in matches {
                            let pointer = match output {
                                Some(name) => Pointer::new(new_parent).with_extended(name),
                                None => Pointer::new(new_parent),
                            };
                            copy.set_pointer(input, pointer);
                        }
                    }
                }
            }

            let mut out = Vec::with_capacity(copies.len());
            for (_, mut copy) in copies {
                copy.set_status(RunStatus::Saved);
                project.registry.store_run(&mut copy)?;
                out.push(copy);
            }
            project.registry.commit()?;
            Ok(out)
        })?;
        info!(copied = out.len(), "Runs copied");
        Ok(out)
    }
}

/// Run `f` on `run`, putting `before` back if it fails
fn restore_on_error<T>(
    run: &mut Run,
    before: Run,
    f: impl FnOnce(&mut Run) -> ProjectResult<T>,
) -> ProjectResult<T> {
    let result = f(run);
    if result.is_err() {
        *run = before;
    }
    result
}

fn exit_cause(poll: Option<JobPoll>) -> String {
    poll.and_then(|p| p.exit)
        .and_then(|e| e.message)
        .unwrap_or_else(|| "Execution ended without reporting a final status".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedGateway, failing_commits, local_project, scripted_project};
    use runweave_core::{Binding, RELATION_SOURCE, RELATION_TRANSFORM};
    use runweave_runtime::{ExitInfo, KindRegistry, LocalGateway, ProtocolKind};
    use runweave_storage::Store;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    async fn import_then_filter(project: &mut Project) -> (Run, Run) {
        let mut import = project.new_run("import").unwrap();
        project.save_run(&mut import).unwrap();
        project.launch(&mut import, true).await.unwrap();

        let mut filter = project.new_run("filter").unwrap();
        filter.set_input("input", Binding::output_of(import.id.unwrap(), "volumes"));
        project.save_run(&mut filter).unwrap();
        project.launch(&mut filter, true).await.unwrap();
        (import, filter)
    }

    #[tokio::test]
    async fn test_launch_and_wait_finishes_with_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = local_project(dir.path());
        let (import, filter) = import_then_filter(&mut project).await;

        assert_eq!(import.status, RunStatus::Finished);
        assert_eq!(filter.status, RunStatus::Finished);
        assert!(filter.job_id.is_some());
        let stored = project.get_run(filter.id.unwrap()).unwrap();
        assert_eq!(stored.status, RunStatus::Finished);
        let volumes = stored.outputs.get("filtered").unwrap().object_id;
        assert_eq!(project.store().get_data(volumes).unwrap().type_name, "Volume");
        assert!(dir.path().join(stored.working_dir.unwrap()).join("logs/run.redb").is_file());
    }

    #[tokio::test]
    async fn test_graph_edge_and_relations() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = local_project(dir.path());
        let (import, filter) = import_then_filter(&mut project).await;
        let (a, b) = (import.id.unwrap(), filter.id.unwrap());

        let graph = project.runs_graph().unwrap();
        assert_eq!(graph.children_of(a), vec![b]);
        assert_eq!(graph.parents_of(a), Vec::<ObjectId>::new());

        let volumes = import.outputs.get("volumes").unwrap().object_id;
        let filtered = filter.outputs.get("filtered").unwrap().object_id;
        assert_eq!(project.source_children(volumes).unwrap(), vec![filtered]);
        assert_eq!(project.source_parents(filtered).unwrap(), vec![volumes]);
        let sources = project.store().relations_of_kind(RELATION_SOURCE).unwrap();
        let transforms = project.store().relations_of_kind(RELATION_TRANSFORM).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(transforms.len(), 1);
        assert_eq!(sources[0].creator, b);
    }

    #[tokio::test]
    async fn test_delete_refused_then_group_delete() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = local_project(dir.path());
        let (import, filter) = import_then_filter(&mut project).await;
        let (a, b) = (import.id.unwrap(), filter.id.unwrap());

        let err = project.delete_runs(&[a]).unwrap_err();
        match &err {
            ProjectError::Dependencies { offenders, .. } => {
                assert_eq!(offenders.len(), 1);
                assert_eq!(offenders[0].dependent, b);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains(&filter.label));
        assert!(project.get_run(a).is_ok());

        let report = project.delete_runs(&[a, b]).unwrap();
        assert_eq!(report.deleted, vec![a, b]);
        assert!(report.is_complete());
        assert!(project.runs(false).await.unwrap().is_empty());
        assert!(!dir.path().join(import.working_dir.unwrap()).exists());
        assert!(project.store().relations_of_kind(RELATION_SOURCE).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_reports_unknown_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = local_project(dir.path());
        let mut import = project.new_run("import").unwrap();
        let a = project.save_run(&mut import).unwrap();
        let missing = ObjectId::from_raw(999);

        let report = project.delete_runs(&[a, missing]).unwrap();
        assert_eq!(report.deleted, vec![a]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, missing);
    }

    #[tokio::test]
    async fn test_saved_dependent_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = local_project(dir.path());
        let mut import = project.new_run("import").unwrap();
        let a = project.save_run(&mut import).unwrap();
        let mut filter = project.new_run("filter").unwrap();
        filter.set_input("input", Binding::output_of(a, "volumes"));
        project.save_run(&mut filter).unwrap();

        assert!(project.check_modification_allowed(&[a], "delete").is_ok());
    }

    #[tokio::test]
    async fn test_copy_rewires_internal_pointers() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = local_project(dir.path());
        let (import, filter) = import_then_filter(&mut project).await;
        let (a, b) = (import.id.unwrap(), filter.id.unwrap());

        let copies = project.copy_runs(&[a, b]).unwrap();
        assert_eq!(copies.len(), 2);
        let (a2, b2) = (copies[0].id.unwrap(), copies[1].id.unwrap());
        assert_eq!(copies[0].label, "Import 2");
        assert!(copies.iter().all(Run::is_saved));

        let pointer = copies[1].inputs.get("input").and_then(Binding::as_pointer).unwrap();
        assert_eq!(pointer.target, Some(a2));
        assert_eq!(pointer.extended.as_deref(), Some("volumes"));

        let graph = project.runs_graph().unwrap();
        assert_eq!(graph.children_of(a2), vec![b2]);
        assert_eq!(graph.children_of(a), vec![b]);
    }

    #[tokio::test]
    async fn test_copy_single_run_keeps_external_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = local_project(dir.path());
        let (import, filter) = import_then_filter(&mut project).await;

        let copies = project.copy_runs(&[filter.id.unwrap()]).unwrap();
        let pointer = copies[0].inputs.get("input").and_then(Binding::as_pointer).unwrap();
        assert_eq!(pointer.target, import.id);
    }

    #[tokio::test]
    async fn test_self_reference_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = local_project(dir.path());
        let mut filter = project.new_run("filter").unwrap();
        let id = project.save_run(&mut filter).unwrap();
        filter.set_input("input", Binding::output_of(id, "filtered"));

        let err = project.save_run(&mut filter).unwrap_err();
        assert!(matches!(err, ProjectError::SelfReference { .. }));
        let err = project.launch(&mut filter, false).await.unwrap_err();
        assert!(matches!(err, ProjectError::SelfReference { .. }));
        assert_eq!(project.get_run(id).unwrap().status, RunStatus::Saved);
    }

    #[tokio::test]
    async fn test_cycle_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = local_project(dir.path());
        let mut first = project.new_run("filter").unwrap();
        let a = project.save_run(&mut first).unwrap();
        let mut second = project.new_run("filter").unwrap();
        second.set_input("input", Binding::output_of(a, "filtered"));
        let b = project.save_run(&mut second).unwrap();

        first.set_input("input", Binding::output_of(b, "filtered"));
        let err = project.save_run(&mut first).unwrap_err();
        assert!(matches!(err, ProjectError::Cycle { .. }));
    }

    #[tokio::test]
    async fn test_cannot_save_finished_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = local_project(dir.path());
        let mut import = project.new_run("import").unwrap();
        project.save_run(&mut import).unwrap();
        project.launch(&mut import, true).await.unwrap();

        let err = project.save_run(&mut import).unwrap_err();
        assert!(matches!(err, ProjectError::CannotSave { status: RunStatus::Finished, .. }));
    }

    #[tokio::test]
    async fn test_read_only_refuses_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = local_project(dir.path());
        let mut import = project.new_run("import").unwrap();
        let a = project.save_run(&mut import).unwrap();
        project.set_read_only(true).unwrap();

        assert!(matches!(project.delete_runs(&[a]), Err(ProjectError::ReadOnly { .. })));
        assert!(matches!(project.save_run(&mut import), Err(ProjectError::ReadOnly { .. })));
        assert!(matches!(
            project.launch(&mut import, false).await,
            Err(ProjectError::ReadOnly { .. })
        ));
        assert!(matches!(project.copy_runs(&[a]), Err(ProjectError::ReadOnly { .. })));
        assert_eq!(project.runs(true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_kind_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = local_project(dir.path());
        let mut run = Run::new("ghost");
        let err = project.launch(&mut run, false).await.unwrap_err();
        assert!(matches!(err, ProjectError::InvalidRunKind { .. }));
        assert!(run.id.is_none());
    }

    #[tokio::test]
    async fn test_failing_handler_recorded_on_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = local_project(dir.path());
        let mut broken = project.new_run("broken").unwrap();
        project.save_run(&mut broken).unwrap();
        project.launch(&mut broken, true).await.unwrap();

        assert_eq!(broken.status, RunStatus::Failed);
        assert_eq!(broken.error.as_deref(), Some("volume is corrupted"));
        assert!(broken.outputs.is_empty());
    }

    #[tokio::test]
    async fn test_interactive_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = local_project(dir.path());
        let mut pick = project.new_run("pick").unwrap();
        assert!(pick.interactive);
        project.save_run(&mut pick).unwrap();
        project.launch(&mut pick, true).await.unwrap();
        assert_eq!(pick.status, RunStatus::WaitingApproval);
        assert_eq!(pick.outputs.len(), 1);

        project.continue_run(&mut pick, true).await.unwrap();
        assert_eq!(pick.status, RunStatus::Finished);
        assert_eq!(pick.outputs.len(), 2);

        let err = project.continue_run(&mut pick, false).await.unwrap_err();
        assert!(matches!(err, ProjectError::CannotContinue { .. }));
    }

    #[tokio::test]
    async fn test_stop_marks_aborted_even_when_terminate_fails() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::new());
        let mut project = scripted_project(dir.path(), Arc::clone(&gateway));
        let mut import = project.new_run("import").unwrap();
        project.save_run(&mut import).unwrap();
        project.launch(&mut import, false).await.unwrap();
        assert_eq!(import.status, RunStatus::Launched);

        gateway.fail_terminate();
        let err = project.stop(&mut import).await.unwrap_err();
        assert!(matches!(err, ProjectError::Gateway(_)));
        assert_eq!(project.get_run(import.id.unwrap()).unwrap().status, RunStatus::Aborted);
    }

    #[tokio::test]
    async fn test_launch_failure_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.fail_start();
        let mut project = scripted_project(dir.path(), gateway);
        let mut import = project.new_run("import").unwrap();
        project.save_run(&mut import).unwrap();

        project.launch(&mut import, true).await.unwrap();
        assert_eq!(import.status, RunStatus::Failed);
        assert!(import.error.unwrap().contains("no slots"));
    }

    #[tokio::test]
    async fn test_status_never_regresses() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::new());
        let mut project = scripted_project(dir.path(), Arc::clone(&gateway));
        let mut import = project.new_run("import").unwrap();
        let id = project.save_run(&mut import).unwrap();
        project.launch(&mut import, false).await.unwrap();

        gateway.set_state(JobState::Running, None);
        project.sync_run(&mut import).await.unwrap();
        assert_eq!(import.status, RunStatus::Running);

        // The job wrote a final status into its snapshot.
        let db_path = import.snapshot_path(dir.path()).unwrap();
        {
            let mut snapshot = Store::open(&db_path).unwrap();
            let mut recorded = snapshot.get_run(id).unwrap();
            recorded.set_status(RunStatus::Finished);
            snapshot.put_run(&mut recorded).unwrap();
            snapshot.commit().unwrap();
        }
        gateway.set_state(JobState::Finished, Some(ExitInfo::success()));
        project.sync_run(&mut import).await.unwrap();
        assert_eq!(import.status, RunStatus::Finished);

        // A stale poll afterwards changes nothing.
        gateway.set_state(JobState::Running, None);
        project.sync_run(&mut import).await.unwrap();
        let listed = project.runs(true).await.unwrap();
        assert_eq!(listed[0].status, RunStatus::Finished);
        assert_eq!(project.get_run(id).unwrap().status, RunStatus::Finished);
    }

    #[tokio::test]
    async fn test_stale_snapshot_with_failed_job_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::new());
        let mut project = scripted_project(dir.path(), Arc::clone(&gateway));
        let mut import = project.new_run("import").unwrap();
        project.save_run(&mut import).unwrap();
        project.launch(&mut import, false).await.unwrap();

        gateway.set_state(JobState::Failed, Some(ExitInfo::failure("killed by signal 9")));
        let runs = project.refresh_runs().await.unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].error.as_deref(), Some("killed by signal 9"));
    }

    #[tokio::test]
    async fn test_unreadable_snapshot_fails_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::new());
        let mut project = scripted_project(dir.path(), Arc::clone(&gateway));
        let mut import = project.new_run("import").unwrap();
        project.save_run(&mut import).unwrap();
        project.launch(&mut import, false).await.unwrap();

        std::fs::remove_file(import.snapshot_path(dir.path()).unwrap()).unwrap();
        gateway.set_state(JobState::Finished, Some(ExitInfo::success()));
        project.sync_run(&mut import).await.unwrap();

        assert_eq!(import.status, RunStatus::Failed);
        assert!(import.error.as_deref().unwrap().starts_with("Cannot read run snapshot"));
        assert_eq!(gateway.polls(), 1);
    }

    #[test]
    fn test_copy_run_is_unsaved_definition() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = local_project(dir.path());
        let mut import = project.new_run("import").unwrap();
        import.comment = "first batch".to_string();
        import.set_input("count", Binding::literal(5));
        project.save_run(&mut import).unwrap();

        let copy = project.copy_run(&import).unwrap();
        assert!(copy.id.is_none());
        assert_eq!(copy.comment, "first batch");
        assert_eq!(copy.literal("count"), Some(&serde_json::json!(5)));
        assert_eq!(copy.label, "Import 2");
    }

    #[tokio::test]
    async fn test_transient_poll_error_keeps_run_active() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::new());
        let mut project = scripted_project(dir.path(), Arc::clone(&gateway));
        let mut import = project.new_run("import").unwrap();
        let id = project.save_run(&mut import).unwrap();
        project.launch(&mut import, false).await.unwrap();

        gateway.set_state(JobState::Running, None);
        gateway.fail_polls(1);
        project.sync_run(&mut import).await.unwrap();
        assert_eq!(import.status, RunStatus::Running);
        assert_eq!(import.error, None);
        assert_eq!(gateway.polls(), 2);

        // Unreachable for longer than the retries: nothing changes.
        gateway.fail_polls(100);
        project.sync_run(&mut import).await.unwrap();
        assert_eq!(import.status, RunStatus::Running);
        assert_eq!(project.get_run(id).unwrap().status, RunStatus::Running);
    }

    #[tokio::test]
    async fn test_wait_gives_up_on_unreachable_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::new());
        let mut project = scripted_project(dir.path(), Arc::clone(&gateway));
        let mut import = project.new_run("import").unwrap();
        let id = project.save_run(&mut import).unwrap();
        gateway.fail_polls(100);

        project.launch(&mut import, true).await.unwrap();
        assert_eq!(import.status, RunStatus::Launched);
        assert_eq!(import.error, None);
        assert_eq!(project.get_run(id).unwrap().status, RunStatus::Launched);
    }

    #[tokio::test]
    async fn test_failed_save_commit_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = local_project(dir.path());
        let fail = failing_commits(&mut project);
        let mut import = project.new_run("import").unwrap();

        fail.store(true, Ordering::SeqCst);
        assert!(matches!(project.save_run(&mut import), Err(ProjectError::Store(_))));
        assert!(import.id.is_none());
        assert_eq!(import.working_dir, None);
        assert_eq!(project.store().pending(), 0);
        assert!(project.runs(false).await.unwrap().is_empty());

        fail.store(false, Ordering::SeqCst);
        project.save_run(&mut import).unwrap();
        assert_eq!(project.runs(false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_launch_commit_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::new());
        let mut project = scripted_project(dir.path(), Arc::clone(&gateway));
        let fail = failing_commits(&mut project);
        let mut import = project.new_run("import").unwrap();
        let id = project.save_run(&mut import).unwrap();

        fail.store(true, Ordering::SeqCst);
        assert!(project.launch(&mut import, false).await.is_err());
        assert_eq!(import.status, RunStatus::Saved);
        assert_eq!(project.get_run(id).unwrap().status, RunStatus::Saved);
        assert_eq!(project.store().pending(), 0);
    }

    #[tokio::test]
    async fn test_failed_sync_commit_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::new());
        let mut project = scripted_project(dir.path(), Arc::clone(&gateway));
        let fail = failing_commits(&mut project);
        let mut import = project.new_run("import").unwrap();
        let id = project.save_run(&mut import).unwrap();
        project.launch(&mut import, false).await.unwrap();

        gateway.set_state(JobState::Failed, Some(ExitInfo::failure("out of memory")));
        fail.store(true, Ordering::SeqCst);
        assert!(project.sync_run(&mut import).await.is_err());
        assert_eq!(import.status, RunStatus::Launched);
        assert_eq!(import.error, None);
        assert_eq!(project.get_run(id).unwrap().status, RunStatus::Launched);
        assert_eq!(project.store().pending(), 0);

        fail.store(false, Ordering::SeqCst);
        project.sync_run(&mut import).await.unwrap();
        assert_eq!(import.status, RunStatus::Failed);
        assert_eq!(import.error.as_deref(), Some("out of memory"));
    }

    #[tokio::test]
    async fn test_failed_copy_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = {
            let mut project = local_project(dir.path());
            let mut import = project.new_run("import").unwrap();
            let a = project.save_run(&mut import).unwrap();
            let mut filter = project.new_run("filter").unwrap();
            let b = project.save_run(&mut filter).unwrap();
            (a, b)
        };

        // Reopen without the filter kind: its copy cannot be made.
        let mut registry = KindRegistry::new();
        registry.register(ProtocolKind::new("import", "Import")).unwrap();
        let registry = Arc::new(registry);
        let gateway = Arc::new(LocalGateway::new(Arc::clone(&registry)));
        let mut project = Project::load(dir.path(), registry, gateway).unwrap();

        let err = project.copy_runs(&[a, b]).unwrap_err();
        assert!(matches!(err, ProjectError::InvalidRunKind { .. }));
        assert_eq!(project.store().pending(), 0);
        assert_eq!(project.runs(false).await.unwrap().len(), 2);

        let mut extra = project.new_run("import").unwrap();
        project.save_run(&mut extra).unwrap();
        assert_eq!(project.runs(false).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_snapshot_write_failure_recorded_on_run() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::new());
        let mut project = scripted_project(dir.path(), Arc::clone(&gateway));
        let mut pick = project.new_run("pick").unwrap();
        let id = project.save_run(&mut pick).unwrap();

        // A directory where the snapshot file should go.
        std::fs::create_dir_all(pick.snapshot_path(dir.path()).unwrap()).unwrap();
        pick.status = RunStatus::WaitingApproval;
        project.continue_run(&mut pick, false).await.unwrap();

        assert_eq!(pick.status, RunStatus::Failed);
        assert!(pick.error.as_deref().unwrap().starts_with("Cannot prepare run"));
        assert_eq!(pick.job_id, None);
        let stored = project.get_run(id).unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.error, pick.error);
    }

    #[tokio::test]
    async fn test_stop_refuses_runs_not_executing() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = local_project(dir.path());
        let mut import = project.new_run("import").unwrap();
        let id = project.save_run(&mut import).unwrap();

        let err = project.stop(&mut import).await.unwrap_err();
        assert!(matches!(err, ProjectError::CannotStop { status: RunStatus::Saved, .. }));
        assert!(err.is_precondition());

        project.launch(&mut import, true).await.unwrap();
        let err = project.stop(&mut import).await.unwrap_err();
        assert!(matches!(err, ProjectError::CannotStop { status: RunStatus::Finished, .. }));
        assert_eq!(project.get_run(id).unwrap().status, RunStatus::Finished);
    }

    #[tokio::test]
    async fn test_read_only_stop_terminates_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::new());
        let mut project = scripted_project(dir.path(), Arc::clone(&gateway));
        let mut import = project.new_run("import").unwrap();
        let id = project.save_run(&mut import).unwrap();
        project.launch(&mut import, false).await.unwrap();
        project.set_read_only(true).unwrap();

        project.stop(&mut import).await.unwrap();
        assert_eq!(gateway.terminations(), 1);
        assert_eq!(import.status, RunStatus::Aborted);
        assert_eq!(project.get_run(id).unwrap().status, RunStatus::Launched);
    }
}
