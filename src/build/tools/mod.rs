//! Built-in tools.
//!
//! A tool is what a task runs. Every stage hands its tool the merged options and
//! file specs of one target:
//!
//! 1. **clean** - Remove files and directories
//! 2. **copy** - Copy files
//! 3. **concat** - Join files in order
//! 4. **exec** - Run an external command (compilers, prefixers, minifiers, linters)
//! 5. **htmlmin** - Minify markup
//! 6. **usemin-prepare** - Extract inclusion blocks and synthesize targets
//! 7. **usemin** - Rewrite references to the produced artifacts
//!
//! Tools are registered in code. A task picks one with `tool:`, or by being
//! named after it.

mod clean;
mod concat;
mod copy;
mod exec;
mod htmlmin;
mod prepare;
mod usemin;

use std::collections::HashMap;
use std::path::PathBuf;

pub use clean::CleanTool;
pub use concat::ConcatTool;
pub use copy::CopyTool;
pub use exec::ExecTool;
pub use htmlmin::HtmlMinTool;
pub use prepare::PrepareTool;
pub use usemin::UseminTool;

use super::blocks::BlockError;
use super::files::FilesError;
use super::pipeline::PipelineContext;
use super::registry::{RegistryError, ResolvedStage, TaskRegistry};
use super::rewrite::RewriteError;

#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error(transparent)]
    Files(#[from] FilesError),

    #[error(transparent)]
    Blocks(#[from] BlockError),

    #[error(transparent)]
    Rewrite(#[from] RewriteError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("input file {0} does not exist")]
    MissingInput(PathBuf),

    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("'{command}' exited with {status}\n{stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    /// Attach a path to an IO error.
    pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

/// Files a stage wrote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub files: Vec<PathBuf>,
}

impl ToolOutput {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self { files }
    }
}

/// Something a task can run.
///
/// Tools are synchronous; the pipeline waits for each one to finish before
/// starting the next stage.
pub trait Tool: Send + Sync {
    /// Name tasks refer to this tool by.
    fn name(&self) -> &'static str;

    /// Check a stage's options before anything runs.
    fn validate(&self, _stage: &ResolvedStage, _registry: &TaskRegistry) -> Result<(), ToolError> {
        Ok(())
    }

    /// Run one stage.
    fn run(&self, stage: &ResolvedStage, ctx: &mut PipelineContext) -> Result<ToolOutput, ToolError>;
}

/// Tools available to tasks, by name.
pub struct ToolRegistry {
    tools: HashMap<&'static str, Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Create a registry with every built-in tool.
    pub fn with_builtins() -> Self {
        let mut tools = Self::new();
        tools.register(CleanTool);
        tools.register(CopyTool);
        tools.register(ConcatTool);
        tools.register(ExecTool);
        tools.register(HtmlMinTool);
        tools.register(PrepareTool);
        tools.register(UseminTool);
        tools
    }

    /// Add a tool, replacing any tool with the same name.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> &mut Self {
        self.tools.insert(tool.name(), Box::new(tool));
        self
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|tool| tool.as_ref())
    }

    /// Registered tool names, sorted.
    #[cfg(test)]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.tools.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Create the parent directory of an output file.
pub(crate) fn ensure_parent(path: &std::path::Path) -> Result<(), ToolError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(ToolError::io(parent))?;
    }
    Ok(())
}
