//! Pipeline error types.

use super::plan::PlanError;
use crate::build::registry::RegistryError;
use crate::build::tools::ToolError;

/// Errors that can occur while planning or running a pipeline.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("unknown pipeline '{name}' (declared: {declared})")]
    UnknownPipeline { name: String, declared: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("task '{task}' uses unknown tool '{tool}'")]
    UnknownTool { task: String, tool: String },

    #[error("stage '{stage}' is misconfigured: {source}")]
    InvalidStage {
        stage: String,
        #[source]
        source: ToolError,
    },

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: ToolError,
    },
}

impl PipelineError {
    /// Create a stage failure.
    pub fn stage(stage: impl Into<String>, source: ToolError) -> Self {
        Self::Stage {
            stage: stage.into(),
            source,
        }
    }
}
