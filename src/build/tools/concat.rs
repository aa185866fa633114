//! Concat tool.
//!
//! Joins every source of a mapping, in order, into its destination.

use serde::Deserialize;

use super::{Tool, ToolError, ToolOutput, ensure_parent};
use crate::build::pipeline::PipelineContext;
use crate::build::registry::{ResolvedStage, TaskRegistry};

#[derive(Debug, Deserialize)]
struct ConcatOptions {
    #[serde(default = "default_separator")]
    separator: String,
}

fn default_separator() -> String {
    "\n".to_string()
}

pub struct ConcatTool;

impl Tool for ConcatTool {
    fn name(&self) -> &'static str {
        "concat"
    }

    fn validate(&self, stage: &ResolvedStage, _registry: &TaskRegistry) -> Result<(), ToolError> {
        stage.options::<ConcatOptions>()?;
        if stage.files.iter().any(|spec| spec.dest.is_none()) {
            return Err(ToolError::InvalidOptions("concat needs a 'dest' for every file spec".to_string()));
        }
        Ok(())
    }

    fn run(&self, stage: &ResolvedStage, ctx: &mut PipelineContext) -> Result<ToolOutput, ToolError> {
        let options: ConcatOptions = stage.options()?;
        let mut written = Vec::new();

        for mapping in ctx.expand_files(stage)? {
            let Some(dest) = mapping.dest else {
                continue;
            };

            let mut parts = Vec::with_capacity(mapping.src.len());
            for src in &mapping.src {
                if !src.is_file() {
                    return Err(ToolError::MissingInput(src.clone()));
                }
                parts.push(std::fs::read_to_string(src).map_err(ToolError::io(src))?);
            }

            ensure_parent(&dest)?;
            std::fs::write(&dest, parts.join(&options.separator)).map_err(ToolError::io(&dest))?;
            tracing::debug!(sources = parts.len(), dest = %dest.display(), "concatenated");
            written.push(dest);
        }

        Ok(ToolOutput::new(written))
    }
}
