//! Pipeline sequencing.
//!
//! A pipeline is a named list of stage references (`task` or `task:target`).
//! Stages run one at a time: the sequencer waits for each tool to finish
//! before starting the next, and the first failure aborts the rest of the run.
//! Already written outputs stay on disk for inspection.
//!
//! Run order is computed from the `produces`/`consumes` labels stages declare
//! (see [`plan`]), so reordering the declaration can't break a dependency.

mod context;
mod error;
mod plan;

pub use context::PipelineContext;
pub use error::PipelineError;
use plan::plan_order;

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::registry::{StageRef, TaskRegistry};
use super::tools::ToolRegistry;
use crate::config::StageEntry;
use crate::util::format_duration;

/// A stage reference in run order.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStage {
    pub reference: StageRef,
    /// The reference as written in the config
    pub label: String,
}

/// What one task target did.
#[derive(Debug, Clone)]
pub struct StageReport {
    /// `task:target` (or `task`)
    pub stage: String,
    /// Files the stage wrote
    pub files: Vec<std::path::PathBuf>,
    pub elapsed: Duration,
}

/// An ordered list of stages.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    stages: Vec<PlannedStage>,
}

impl Pipeline {
    /// Order declared stage entries by their data dependencies.
    pub fn plan(name: &str, entries: &[StageEntry]) -> Result<Self, PipelineError> {
        let order = plan_order(entries)?;
        let stages = order
            .into_iter()
            .map(|i| planned(entries[i].reference()))
            .collect::<Result<_, _>>()?;

        Ok(Self {
            name: name.to_string(),
            stages,
        })
    }

    /// A pipeline that runs references exactly as listed (watch rules).
    pub fn from_references(name: &str, references: &[String]) -> Result<Self, PipelineError> {
        let stages = references
            .iter()
            .map(|r| planned(r))
            .collect::<Result<_, _>>()?;

        Ok(Self {
            name: name.to_string(),
            stages,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[cfg(test)]
    pub fn stages(&self) -> &[PlannedStage] {
        &self.stages
    }

    /// Check every stage against the registry before anything runs.
    ///
    /// Catches unknown tasks, targets and tools, and options a tool can't
    /// accept. Targets synthesized later from build blocks are checked when
    /// they run.
    pub fn validate(&self, registry: &TaskRegistry, tools: &ToolRegistry) -> Result<(), PipelineError> {
        for planned in &self.stages {
            for stage in registry.expand(&planned.reference)? {
                let tool = tools
                    .get(&stage.tool)
                    .ok_or_else(|| PipelineError::UnknownTool {
                        task: stage.task.clone(),
                        tool: stage.tool.clone(),
                    })?;
                tool.validate(&stage, registry)
                    .map_err(|source| PipelineError::InvalidStage {
                        stage: stage.label(),
                        source,
                    })?;
            }
        }
        Ok(())
    }

    /// Run every stage in order.
    ///
    /// Each reference is expanded against the registry snapshot current at
    /// the time it runs, so targets synthesized by an earlier stage are
    /// picked up.
    pub fn run(&self, tools: &ToolRegistry, ctx: &mut PipelineContext) -> Result<Vec<StageReport>, PipelineError> {
        let mut reports = Vec::new();

        for planned in &self.stages {
            let registry = Arc::clone(&ctx.registry);
            let resolved = registry.expand(&planned.reference)?;
            if resolved.is_empty() {
                tracing::debug!(stage = %planned.label, "no targets, skipping");
                continue;
            }

            for stage in resolved {
                let label = stage.label();
                let tool = tools
                    .get(&stage.tool)
                    .ok_or_else(|| PipelineError::UnknownTool {
                        task: stage.task.clone(),
                        tool: stage.tool.clone(),
                    })?;

                tracing::info!(pipeline = %self.name, stage = %label, "running");
                let start = Instant::now();
                let output = tool
                    .run(&stage, ctx)
                    .map_err(|source| PipelineError::stage(&label, source))?;
                let elapsed = start.elapsed();
                tracing::info!(
                    stage = %label,
                    files = output.files.len(),
                    "finished in {}",
                    format_duration(elapsed)
                );

                reports.push(StageReport {
                    stage: label,
                    files: output.files,
                    elapsed,
                });
            }
        }

        Ok(reports)
    }
}

fn planned(reference: &str) -> Result<PlannedStage, PipelineError> {
    Ok(PlannedStage {
        reference: StageRef::parse(reference)?,
        label: reference.to_string(),
    })
}
