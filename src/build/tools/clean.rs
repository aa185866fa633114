//! Clean tool.
//!
//! Removes the files and directories a target's patterns match. Missing paths
//! are skipped, so cleaning twice is harmless.

use std::path::Path;

use serde::Deserialize;

use super::{Tool, ToolError, ToolOutput};
use crate::build::files::match_patterns;
use crate::build::paths::resolve;
use crate::build::pipeline::PipelineContext;
use crate::build::registry::{ResolvedStage, TaskRegistry};

#[derive(Debug, Default, Deserialize)]
struct CleanOptions {
    /// Allow removing paths outside the project directory
    #[serde(default)]
    force: bool,
}

pub struct CleanTool;

impl Tool for CleanTool {
    fn name(&self) -> &'static str {
        "clean"
    }

    fn validate(&self, stage: &ResolvedStage, _registry: &TaskRegistry) -> Result<(), ToolError> {
        stage.options::<CleanOptions>().map(|_| ())
    }

    fn run(&self, stage: &ResolvedStage, ctx: &mut PipelineContext) -> Result<ToolOutput, ToolError> {
        let options: CleanOptions = stage.options()?;
        let mut removed = Vec::new();

        for spec in &stage.files {
            let cwd = match &spec.cwd {
                Some(cwd) => resolve(&ctx.base_path, cwd),
                None => ctx.base_path.clone(),
            };

            for rel in match_patterns(&cwd, &spec.src, spec.dot)? {
                let path = cwd.join(&rel);
                if !path.exists() {
                    continue;
                }
                check_removable(&ctx.base_path, &path, options.force)?;
                remove(&path)?;
                tracing::debug!(path = %path.display(), "removed");
                removed.push(path);
            }
        }

        Ok(ToolOutput::new(removed))
    }
}

/// Refuse to remove the project directory itself, or anything outside it.
fn check_removable(base_path: &Path, path: &Path, force: bool) -> Result<(), ToolError> {
    if force {
        return Ok(());
    }

    let canonical = |p: &Path| p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
    let base = canonical(base_path);
    let target = canonical(path);

    if target == base {
        return Err(ToolError::Failed(format!(
            "refusing to remove the project directory {}",
            path.display()
        )));
    }
    if !target.starts_with(&base) {
        return Err(ToolError::Failed(format!(
            "refusing to remove {} outside the project directory (set 'force: true' to allow)",
            path.display()
        )));
    }
    Ok(())
}

fn remove(path: &Path) -> Result<(), ToolError> {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    result.map_err(ToolError::io(path))
}
