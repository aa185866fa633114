//! Configuration loading and types for assetflow.
//!
//! This module handles all aspects of configuration:
//! - Type definitions for config structures (`types`)
//! - Loading configs from files (`load`)
//! - Resolving path variable templates across the whole tree (`resolve`)

mod load;
mod resolve;
mod types;

pub use load::{DEFAULT_CONFIG, DEFAULT_CONFIG_FILE};
pub use resolve::OptionPath;
pub use types::{
    FileSpec, OrderedMap, Options, ProjectConfig, ServerProfile, StageEntry, TargetConfig,
    TaskConfig, WatchConfig,
};

// =============================================================================
// Errors
// =============================================================================

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to get current working directory: {0}")]
    CwdFailure(std::io::Error),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("{0}")]
    Validation(String),

    #[error("undefined path variable '{variable}' referenced {location}")]
    UndefinedVariable {
        variable: String,
        location: OptionPath,
    },

    #[error("cyclic path variable reference: {0}")]
    CyclicVariable(String),

    #[error("path variables did not converge after {0} passes (cyclic reference?)")]
    Unresolved(usize),

    #[error("invalid template {location}: {source}")]
    Template {
        location: OptionPath,
        #[source]
        source: tera::Error,
    },
}

/// Format a config deserialization error with helpful context
fn format_config_error(e: serde_json::Error) -> String {
    let msg = e.to_string();

    if msg.contains("missing field `stages`") {
        return "invalid config: every pipeline needs a 'stages' list\n\nExample:\n  pipelines:\n    build:\n      stages:\n        - clean:build\n        - usemin".to_string();
    }
    if msg.contains("missing field `src`") {
        return "invalid config: every file spec needs 'src' (a glob or a list of globs)".to_string();
    }
    if msg.contains("missing field `port`") || msg.contains("missing field `root`") {
        return "invalid config: server profiles need 'root' and 'port'\n\nExample:\n  server:\n    dev:\n      root: \"{{ app }}\"\n      port: 9999".to_string();
    }

    format!("invalid config: {msg}")
}

impl ProjectConfig {
    /// Check cross references that serde can't: pipelines and watch rules must
    /// point at declared tasks and server profiles.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let task_of = |reference: &str| reference.split(':').next().unwrap_or(reference).to_string();

        for (name, pipeline) in self.pipelines.iter() {
            if self.tasks.contains_key(name) {
                return Err(ConfigError::Validation(format!(
                    "'{name}' is declared both as a task and as a pipeline"
                )));
            }
            for stage in &pipeline.stages {
                let task = task_of(stage.reference());
                if !self.tasks.contains_key(&task) {
                    return Err(ConfigError::Validation(format!(
                        "pipeline '{name}' references undeclared task '{task}'"
                    )));
                }
            }
            if let Some(profile) = &pipeline.serve
                && !self.server.contains_key(profile)
            {
                return Err(ConfigError::Validation(format!(
                    "pipeline '{name}' serves undeclared server profile '{profile}'"
                )));
            }
        }

        for (name, rule) in self.watch.rules.iter() {
            for reference in &rule.tasks {
                let task = task_of(reference);
                if !self.tasks.contains_key(&task) {
                    return Err(ConfigError::Validation(format!(
                        "watch rule '{name}' references undeclared task '{task}'"
                    )));
                }
            }
        }

        Ok(())
    }
}
