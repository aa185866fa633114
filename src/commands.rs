//! Command implementations and the pieces they share.

pub mod build;
pub mod clean;
pub mod dev;
pub mod init;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::build::{BuildResult, Builder, base_path_from_config, resolve};
use crate::config::{DEFAULT_CONFIG_FILE, ProjectConfig, ServerProfile};
use crate::server::ServeOptions;
use crate::util::format_duration;

/// A loaded project: its config and the directory paths resolve against.
pub struct Project {
    pub config: ProjectConfig,
    pub base_path: PathBuf,
}

impl Project {
    /// Load the config file given on the command line, or `assetflow.yaml`.
    pub async fn load(config_file: Option<&Path>) -> Result<Self, anyhow::Error> {
        let config_path = config_file
            .map(Path::to_path_buf)
            .unwrap_or_else(|| DEFAULT_CONFIG_FILE.into());
        let config_path = if config_path.is_relative() {
            std::env::current_dir()?.join(&config_path)
        } else {
            config_path
        };

        let config = ProjectConfig::load_from_arg(Some(config_path.as_path())).await?;
        let base_path = base_path_from_config(&config_path);
        Ok(Self { config, base_path })
    }

    /// Server settings for a profile, with its root resolved.
    pub fn serve_options(&self, profile: &str) -> Result<ServeOptions, anyhow::Error> {
        let ServerProfile {
            root,
            hostname,
            port,
            open,
            live_reload,
        } = self
            .config
            .server
            .get(profile)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Unknown server profile '{profile}'"))?;

        Ok(ServeOptions {
            root: resolve(&self.base_path, root),
            hostname,
            port,
            open,
            live_reload,
        })
    }
}

/// Run a pipeline on a blocking worker and print its summary.
pub async fn run_pipeline(builder: Arc<Builder>, name: &str) -> Result<BuildResult, anyhow::Error> {
    let pipeline = name.to_string();
    let result = tokio::task::spawn_blocking(move || builder.run_pipeline(&pipeline)).await??;

    println!(
        "Ran pipeline '{}': {} stage(s), {} file(s) written in {}",
        result.pipeline,
        result.stages.len(),
        result.files(),
        format_duration(result.elapsed)
    );
    for stage in &result.stages {
        println!(
            "  {:<32} {:>4} file(s)  {}",
            stage.stage,
            stage.files.len(),
            format_duration(stage.elapsed)
        );
    }
    Ok(result)
}
