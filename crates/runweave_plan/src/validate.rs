//! Structural checks performed before a run is saved or launched.

use crate::builder::GraphBuilder;
use crate::dag::RunsGraph;
use runweave_core::{ObjectId, PointerResolver, Run};

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// An input of the run points back at the run or its own outputs
    #[error("Input '{input}' of run {run} references the run itself")]
    SelfReference {
        /// Offending run
        run: String,
        /// Offending input
        input: String,
    },

    /// Runs depend on each other in a loop
    #[error("Cycle detected involving runs: {}", format_cycle(.runs))]
    Cycle {
        /// Cycle path, first run repeated at the end
        runs: Vec<ObjectId>,
    },
}

fn format_cycle(runs: &[ObjectId]) -> String {
    runs.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> ")
}

/// Validator for run definitions
pub struct Validator<'a> {
    resolver: &'a dyn PointerResolver,
}

impl<'a> Validator<'a> {
    /// Validator resolving through `resolver`
    #[must_use]
    pub fn new(resolver: &'a dyn PointerResolver) -> Self {
        Self { resolver }
    }

    /// Validate `run` as it would sit among the persisted `runs`
    ///
    /// # Errors
    ///
    /// Returns the first problem found
    pub fn validate(&self, run: &Run, runs: &[Run]) -> Result<(), ValidationError> {
        self.check_self_reference(run)?;
        if let Some(id) = run.id {
            let mut view: Vec<Run> = runs.iter().filter(|r| r.id != Some(id)).cloned().collect();
            view.push(run.clone());
            let graph = GraphBuilder::new(self.resolver).build(&view);
            Self::check_cycles(&graph)?;
        }
        Ok(())
    }

    /// Reject inputs that point at the run or one of its outputs
    ///
    /// # Errors
    ///
    /// Returns `SelfReference` naming the first offending input
    pub fn check_self_reference(&self, run: &Run) -> Result<(), ValidationError> {
        let Some(id) = run.id else {
            return Ok(());
        };
        let outputs: Vec<ObjectId> = run.output_ids().collect();
        for (name, pointer) in run.pointers() {
            let direct = pointer.target == Some(id);
            let via_output = self
                .resolver
                .resolve(pointer)
                .is_some_and(|obj| outputs.contains(&obj));
            if direct || via_output {
                return Err(ValidationError::SelfReference {
                    run: run.display_name(),
                    input: name.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Reject graphs containing a cycle
    ///
    /// # Errors
    ///
    /// Returns `Cycle` with the offending path
    pub fn check_cycles(graph: &RunsGraph) -> Result<(), ValidationError> {
        match graph.find_cycle() {
            Some(runs) => Err(ValidationError::Cycle { runs }),
            None => Ok(()),
        }
    }
}
