//! Portable workflow files.
//!
//! A workflow is a JSON array of flat records, one per run:
//!
//! ```json
//! [
//!   {"object.className": "import", "object.id": "3", "object.label": "Import",
//!    "object.comment": "", "count": 2},
//!   {"object.className": "filter", "object.id": "5", "object.label": "Filter",
//!    "object.comment": "", "input": "3.~volumes"}
//! ]
//! ```
//!
//! Pointer inputs are written as `"<run id>.~<output name>"` relative to the
//! producing run. Only pointers between runs of the same file survive an
//! import; the others come back empty.

use crate::error::{ProjectError, ProjectResult, WorkflowError};
use crate::project::Project;
use indexmap::IndexMap;
use runweave_core::{Binding, ObjectId, Pointer, PointerResolver, Run};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

const CLASS_NAME: &str = "object.className";
const OBJECT_ID: &str = "object.id";
const LABEL: &str = "object.label";
const COMMENT: &str = "object.comment";

/// How `child` consumes `parent`: `(output of parent, input of child)` pairs
///
/// The output is `None` when the child points at the run as a whole.
#[must_use]
pub fn io_matches(resolver: &dyn PointerResolver, parent: &Run, child: &Run) -> Vec<(Option<String>, String)> {
    let Some(parent_id) = parent.id else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for (input, pointer) in child.pointers() {
        if pointer.target == Some(parent_id) {
            out.push((pointer.extended.clone(), input.to_string()));
            continue;
        }
        let Some(object) = resolver.resolve(pointer) else {
            continue;
        };
        let output = parent
            .outputs
            .iter()
            .find(|(_, o)| o.object_id == object || resolver.parent_of(object) == Some(o.object_id))
            .map(|(name, _)| name.clone());
        if let Some(name) = output {
            out.push((Some(name), input.to_string()));
        }
    }
    out
}

/// Result of an import
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    /// Runs created, in file order
    pub runs: Vec<Run>,
    /// Kinds of records that were skipped
    pub skipped: Vec<String>,
}

impl Project {
    /// Workflow records for the given runs
    ///
    /// # Errors
    ///
    /// Returns `InvalidRun` for unknown ids
    pub fn workflow_records(&self, runs: &[ObjectId]) -> ProjectResult<Vec<Value>> {
        let selected: Vec<Run> = runs.iter().map(|id| self.get_run(*id)).collect::<ProjectResult<_>>()?;

        // Output object -> (producing run, output name), over every run of the project.
        let mut producers: HashMap<ObjectId, (ObjectId, String)> = HashMap::new();
        for run in self.registry.list(true)? {
            let Some(id) = run.id else {
                continue;
            };
            for (name, output) in &run.outputs {
                producers.insert(output.object_id, (id, name.clone()));
            }
        }
        let store = self.registry.store();

        let mut records = Vec::with_capacity(selected.len());
        for run in &selected {
            let mut record = Map::new();
            record.insert(CLASS_NAME.to_string(), Value::from(run.kind.clone()));
            record.insert(
                OBJECT_ID.to_string(),
                Value::from(run.id.map(|id| id.to_string()).unwrap_or_default()),
            );
            record.insert(LABEL.to_string(), Value::from(run.label.clone()));
            record.insert(COMMENT.to_string(), Value::from(run.comment.clone()));
            for (name, binding) in &run.inputs {
                let value = match binding {
                    Binding::Literal(value) => value.clone(),
                    Binding::Pointer(pointer) => {
                        let produced = store
                            .resolve(pointer)
                            .and_then(|obj| producers.get(&obj).or_else(|| store.parent_of(obj).and_then(|p| producers.get(&p))));
                        let reference = match produced {
                            Some((owner, output)) => Pointer::new(*owner).with_extended(output.clone()).to_workflow_ref(),
                            None => pointer.to_workflow_ref(),
                        };
                        reference.map_or(Value::Null, Value::from)
                    }
                };
                record.insert(name.clone(), value);
            }
            records.push(Value::Object(record));
        }
        Ok(records)
    }

    /// Write the given runs as a workflow file
    ///
    /// # Errors
    ///
    /// Returns error for unknown ids or if the file cannot be written
    pub fn export_workflow(&self, runs: &[ObjectId], path: &Path) -> ProjectResult<()> {
        let records = self.workflow_records(runs)?;
        let text = serde_json::to_string_pretty(&records).map_err(|e| WorkflowError::Parse(e.to_string()))?;
        std::fs::write(path, text).map_err(|e| ProjectError::io(path, e))?;
        info!(runs = records.len(), path = %path.display(), "Workflow exported");
        Ok(())
    }

    /// Import a workflow file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or the project is read-only
    pub fn import_workflow(&mut self, path: &Path) -> ProjectResult<ImportReport> {
        let text = std::fs::read_to_string(path).map_err(|e| ProjectError::io(path, e))?;
        self.import_workflow_str(&text)
    }

    /// Import workflow records from a JSON string
    ///
    /// Records of unknown kinds are skipped with a warning. Every record is
    /// checked before anything is staged; a failed import saves nothing.
    ///
    /// # Errors
    ///
    /// Returns error if the text is not a workflow, or the project is read-only
    pub fn import_workflow_str(&mut self, text: &str) -> ProjectResult<ImportReport> {
        self.check_writable("import a workflow")?;
        let records: Vec<Map<String, Value>> =
            serde_json::from_str(text).map_err(|e| WorkflowError::Parse(e.to_string()))?;
        let kinds = records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                record
                    .get(CLASS_NAME)
                    .and_then(Value::as_str)
                    .ok_or(WorkflowError::MissingField { index, field: CLASS_NAME })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let report = self.transaction(|project| {
            let mut report = ImportReport::default();
            let mut imported: IndexMap<String, Run> = IndexMap::new();
            let mut deferred: Vec<(String, String, String)> = Vec::new();

            for (index, (record, kind)) in records.iter().zip(kinds).enumerate() {
                let Some(protocol) = project.kinds.get(kind) else {
                    warn!(kind, index, "Unknown protocol kind in workflow, record skipped");
                    report.skipped.push(kind.to_string());
                    continue;
                };
                let old_id = match record.get(OBJECT_ID) {
                    Some(Value::String(id)) => id.clone(),
                    Some(Value::Number(id)) => id.to_string(),
                    _ => index.to_string(),
                };

                let mut run = project.new_run(kind)?;
                if let Some(label) = record.get(LABEL).and_then(Value::as_str) {
                    run.label = label.to_string();
                }
                if let Some(comment) = record.get(COMMENT).and_then(Value::as_str) {
                    run.comment = comment.to_string();
                }
                for (name, value) in record.iter().filter(|(k, _)| !k.starts_with("object.")) {
                    if protocol.is_pointer_param(name) {
                        run.set_pointer(name, Pointer::empty());
                        if let Some(reference) = value.as_str() {
                            deferred.push((old_id.clone(), name.clone(), reference.to_string()));
                        }
                    } else {
                        run.set_input(name, Binding::Literal(value.clone()));
                    }
                }
                project.registry.setup(&mut run)?;
                imported.insert(old_id, run);
            }

            for (owner, input, reference) in deferred {
                let pointer = Pointer::parse_workflow_ref(&reference)
                    .and_then(|(target, extended)| {
                        let new_id = imported.get(&target).and_then(|r| r.id)?;
                        Some(match extended {
                            Some(name) => Pointer::new(new_id).with_extended(name),
                            None => Pointer::new(new_id),
                        })
                    })
                    .unwrap_or_else(Pointer::empty);
                if let Some(run) = imported.get_mut(&owner) {
                    run.set_pointer(input, pointer);
                }
            }

            for run in imported.values_mut() {
                project.registry.store_run(run)?;
            }
            project.registry.commit()?;
            report.runs = imported.into_values().collect();
            Ok(report)
        })?;
        info!(imported = report.runs.len(), skipped = report.skipped.len(), "Workflow imported");
        Ok(report)
    }
}
