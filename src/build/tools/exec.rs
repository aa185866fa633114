//! Exec tool.
//!
//! Runs an external program once per file mapping. This is how style
//! compilers, prefixers, minifiers, linters and doc generators plug in:
//!
//! ```yaml
//! uglify:
//!   tool: exec
//!   options:
//!     command: npx
//!     args: [terser, "{srcs}", --output, "{dest}"]
//! ```
//!
//! In `args`, `{src}` is the first source, `{dest}` the destination and
//! `{srcs}` every source. An argument that is exactly `{srcs}` becomes one
//! argument per source.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;

use super::{Tool, ToolError, ToolOutput, ensure_parent};
use crate::build::paths::resolve;
use crate::build::pipeline::PipelineContext;
use crate::build::registry::{ResolvedStage, TaskRegistry};

#[derive(Debug, Deserialize)]
struct ExecOptions {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    /// Working directory, relative to the project directory
    #[serde(default)]
    cwd: Option<String>,
}

pub struct ExecTool;

impl Tool for ExecTool {
    fn name(&self) -> &'static str {
        "exec"
    }

    fn validate(&self, stage: &ResolvedStage, _registry: &TaskRegistry) -> Result<(), ToolError> {
        let options: ExecOptions = stage.options()?;
        if options.command.trim().is_empty() {
            return Err(ToolError::InvalidOptions("'command' must not be empty".to_string()));
        }
        Ok(())
    }

    fn run(&self, stage: &ResolvedStage, ctx: &mut PipelineContext) -> Result<ToolOutput, ToolError> {
        let options: ExecOptions = stage.options()?;
        let cwd = options
            .cwd
            .as_ref()
            .map(|c| resolve(&ctx.base_path, c))
            .unwrap_or_else(|| ctx.base_path.clone());

        if stage.files.is_empty() {
            let args = substitute(&options.args, &[], None);
            run_command(&options.command, &args, &cwd)?;
            return Ok(ToolOutput::default());
        }

        let mut written = Vec::new();
        for mapping in ctx.expand_files(stage)? {
            if mapping.src.is_empty() {
                tracing::debug!(stage = %stage.label(), "no matching sources, skipping");
                continue;
            }
            if let Some(dest) = &mapping.dest {
                ensure_parent(dest)?;
            }

            let args = substitute(&options.args, &mapping.src, mapping.dest.as_deref());
            run_command(&options.command, &args, &cwd)?;
            written.extend(mapping.dest);
        }

        Ok(ToolOutput::new(written))
    }
}

/// Fill the `{src}`, `{srcs}` and `{dest}` placeholders.
fn substitute(args: &[String], srcs: &[PathBuf], dest: Option<&Path>) -> Vec<String> {
    let display = |p: &Path| p.to_string_lossy().into_owned();
    let first = srcs.first().map(|p| display(p)).unwrap_or_default();
    let joined = srcs.iter().map(|p| display(p)).collect::<Vec<_>>().join(" ");
    let dest = dest.map(display).unwrap_or_default();

    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        if arg == "{srcs}" {
            out.extend(srcs.iter().map(|p| display(p)));
            continue;
        }
        out.push(
            arg.replace("{srcs}", &joined)
                .replace("{src}", &first)
                .replace("{dest}", &dest),
        );
    }
    out
}

fn run_command(command: &str, args: &[String], cwd: &Path) -> Result<(), ToolError> {
    tracing::debug!(command, ?args, "exec");

    let output = Command::new(command)
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(|source| ToolError::Spawn {
            command: command.to_string(),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        tracing::debug!(command, "{}", stdout.trim_end());
    }

    if !output.status.success() {
        return Err(ToolError::Command {
            command: command.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}
