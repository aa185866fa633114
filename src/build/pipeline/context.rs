//! Pipeline context for sharing state across stages.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::build::blocks::BlockPlan;
use crate::build::files::{FileMapping, FilesError, expand_all};
use crate::build::registry::{ResolvedStage, TaskRegistry};

/// State one pipeline run threads through its stages.
///
/// Stages run one at a time, so tools get exclusive access while they run.
pub struct PipelineContext {
    /// Directory every relative path is resolved against (the config file's)
    pub base_path: PathBuf,

    /// Current registry snapshot. Block preparation swaps in a new one.
    pub registry: Arc<TaskRegistry>,

    /// Blocks found by `usemin-prepare`, waiting for `usemin`
    pub blocks: Option<BlockPlan>,

    /// Markup copies whose blocks were already replaced in this run
    pub rewritten: HashSet<String>,
}

impl PipelineContext {
    pub fn new(base_path: PathBuf, registry: Arc<TaskRegistry>) -> Self {
        Self {
            base_path,
            registry,
            blocks: None,
            rewritten: HashSet::new(),
        }
    }

    /// Expand a stage's file specs against the project directory.
    pub fn expand_files(&self, stage: &ResolvedStage) -> Result<Vec<FileMapping>, FilesError> {
        expand_all(&stage.files, &self.base_path)
    }
}
