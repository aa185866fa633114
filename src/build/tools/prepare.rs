//! Block preparation (`usemin-prepare`).
//!
//! Reads the markup a target matches, extracts its inclusion blocks and
//! replaces the pipeline's registry with a snapshot that holds one target per
//! block output for every step of the kind's flow. The block plan is kept in
//! the pipeline context for the `usemin` stage.

use std::sync::Arc;

use serde::Deserialize;

use super::{Tool, ToolError, ToolOutput};
use crate::build::blocks::{BlockError, BlockPlan, Flows, MarkupFile, parse_blocks};
use crate::build::files::match_patterns;
use crate::build::paths::resolve;
use crate::build::pipeline::PipelineContext;
use crate::build::registry::{ResolvedStage, TaskRegistry};

#[derive(Debug, Deserialize)]
struct PrepareOptions {
    /// Distribution root the last flow step writes into
    dest: String,
    /// Directory intermediate flow steps write into
    staging: String,
    #[serde(default)]
    flow: Flows,
}

pub struct PrepareTool;

impl Tool for PrepareTool {
    fn name(&self) -> &'static str {
        "usemin-prepare"
    }

    fn validate(&self, stage: &ResolvedStage, registry: &TaskRegistry) -> Result<(), ToolError> {
        let options: PrepareOptions = stage.options()?;

        for (kind, flow) in [("js", &options.flow.js), ("css", &options.flow.css)] {
            if flow.as_ref().is_some_and(|f| f.steps.is_empty()) {
                return Err(ToolError::InvalidOptions(format!("flow '{kind}' has no steps")));
            }
        }
        if let Some(step) = options.flow.steps().find(|step| !registry.contains(step)) {
            return Err(ToolError::InvalidOptions(format!(
                "flow step '{step}' is not a declared task"
            )));
        }
        Ok(())
    }

    fn run(&self, stage: &ResolvedStage, ctx: &mut PipelineContext) -> Result<ToolOutput, ToolError> {
        let options: PrepareOptions = stage.options()?;

        let mut markup = Vec::new();
        for spec in &stage.files {
            let cwd = match &spec.cwd {
                Some(cwd) => resolve(&ctx.base_path, cwd),
                None => ctx.base_path.clone(),
            };
            for relative in match_patterns(&cwd, &spec.src, spec.dot)? {
                let path = cwd.join(&relative);
                let content = std::fs::read_to_string(&path).map_err(|source| BlockError::Read {
                    path: path.clone(),
                    source,
                })?;
                let blocks = parse_blocks(&path, &content)?;
                markup.push(MarkupFile {
                    path,
                    relative,
                    blocks,
                });
            }
        }

        let plan = BlockPlan::new(markup, &options.flow, &ctx.base_path)?;
        let targets = plan.synthesize(
            &options.flow,
            &resolve(&ctx.base_path, &options.dest),
            &resolve(&ctx.base_path, &options.staging),
        );

        let mut builder = ctx.registry.to_builder();
        for step in options.flow.steps() {
            builder.expect_synthesized(step)?;
        }
        for target in &targets {
            builder.inject_synthesized(&target.task, &target.target, target.config.clone())?;
        }

        tracing::info!(
            files = plan.files.len(),
            blocks = plan.block_count(),
            outputs = plan.outputs.len(),
            targets = targets.len(),
            "prepared build blocks"
        );
        for group in &plan.outputs {
            tracing::debug!(output = %group.output, artifact = %group.artifact, sources = group.sources.len(), "block output");
        }

        ctx.registry = Arc::new(builder.build());
        ctx.blocks = Some(plan);
        Ok(ToolOutput::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::pipeline::tests::{context_with, stage};
    use crate::build::registry::StageRef;
    use std::fs;

    const TASKS: &str = r#"
tasks:
  concat: {}
  uglify:
    tool: exec
    options:
      command: terser
  cssmin: {}
"#;

    fn prepare_stage() -> ResolvedStage {
        stage(
            "useminPrepare",
            "usemin-prepare",
            serde_json::json!({
                "dest": "build",
                "staging": ".tmp",
                "flow": {
                    "js": { "steps": ["concat", "uglify"], "search_path": "src" },
                    "css": { "steps": ["concat", "cssmin"] }
                }
            }),
            "- cwd: src\n  src: '*.html'\n",
        )
    }

    #[test]
    fn test_injects_targets_for_each_flow_step() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(
            root.join("src/index.html"),
            "<!-- build:js main.js --><script src=\"js/a.js\"></script><!-- endbuild -->\n\
             <!-- build:js vendor.js --><script src=\"lib/x.js\"></script><!-- endbuild -->",
        )
        .unwrap();

        let mut ctx = context_with(root, TASKS);
        let before = Arc::clone(&ctx.registry);
        PrepareTool.run(&prepare_stage(), &mut ctx).unwrap();

        assert_eq!(ctx.registry.targets("concat").unwrap(), vec!["js/main.js", "js/vendor.js"]);
        assert_eq!(ctx.registry.targets("uglify").unwrap(), vec!["js/main.js", "js/vendor.js"]);
        assert!(ctx.registry.targets("cssmin").unwrap().is_empty());
        // No css blocks: cssmin has nothing to run rather than running bare
        assert!(ctx.registry.expand(&StageRef::parse("cssmin").unwrap()).unwrap().is_empty());
        // The snapshot the pipeline started with is untouched
        assert!(before.targets("concat").unwrap().is_empty());

        let uglify = ctx.registry.stage("uglify", Some("js/main.js")).unwrap();
        assert_eq!(uglify.options["command"], "terser");
        assert_eq!(
            uglify.files[0].dest.as_deref(),
            Some(root.join("build/js/main.min.js").to_string_lossy().as_ref())
        );

        let plan = ctx.blocks.as_ref().unwrap();
        assert_eq!(plan.files[0].relative, "index.html");
        assert_eq!(plan.block_count(), 2);
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/broken.html"), "<p></p>\n<!-- endbuild -->").unwrap();

        let err = PrepareTool
            .run(&prepare_stage(), &mut context_with(root, TASKS))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("broken.html:2"), "{message}");
    }

    #[test]
    fn test_validate_rejects_unknown_flow_step() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with(dir.path(), "tasks:\n  concat: {}\n");
        let err = PrepareTool.validate(&prepare_stage(), &ctx.registry).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid options: flow step 'uglify' is not a declared task"
        );
    }
}
