//! Reference rewriting (`usemin`).
//!
//! Replaces the inclusion blocks found by `usemin-prepare` in the distributed
//! markup, then rewrites `url()` references of the stylesheets the target
//! matches.

use std::collections::HashSet;

use serde::Deserialize;

use super::{Tool, ToolError, ToolOutput};
use crate::build::paths::resolve;
use crate::build::pipeline::PipelineContext;
use crate::build::registry::{ResolvedStage, TaskRegistry};
use crate::build::rewrite::{RewriteOptions, Rewriter};

#[derive(Debug, Deserialize)]
struct UseminOptions {
    /// Distribution root holding the markup copies and artifacts
    root: String,
    #[serde(default)]
    cdn: String,
    #[serde(default)]
    flatten: bool,
}

pub struct UseminTool;

impl Tool for UseminTool {
    fn name(&self) -> &'static str {
        "usemin"
    }

    fn validate(&self, stage: &ResolvedStage, _registry: &TaskRegistry) -> Result<(), ToolError> {
        stage.options::<UseminOptions>().map(|_| ())
    }

    fn run(&self, stage: &ResolvedStage, ctx: &mut PipelineContext) -> Result<ToolOutput, ToolError> {
        let options: UseminOptions = stage.options()?;
        let plan = ctx.blocks.as_ref().ok_or_else(|| {
            ToolError::Failed("no build blocks to rewrite; run a usemin-prepare stage first".to_string())
        })?;

        let rewriter = Rewriter::new(
            resolve(&ctx.base_path, &options.root),
            RewriteOptions {
                cdn: options.cdn,
                flatten: options.flatten,
            },
        );

        let mut written = Vec::new();
        for file in &plan.files {
            // A task with several targets must not rewrite the same copy twice
            if !ctx.rewritten.insert(file.relative.clone()) {
                continue;
            }
            if let Some(path) = rewriter.rewrite_markup(plan, file)? {
                written.push(path);
            }
        }

        let mut seen = HashSet::new();
        for mapping in ctx.expand_files(stage)? {
            for path in mapping.src {
                if seen.insert(path.clone()) && path.is_file() && rewriter.rewrite_stylesheet(&path)? {
                    written.push(path);
                }
            }
        }

        tracing::debug!(files = written.len(), "rewrote references");
        Ok(ToolOutput::new(written))
    }
}
