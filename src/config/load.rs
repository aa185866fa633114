//! Configuration loading from files.
//!
//! This module handles reading the YAML file, resolving path templates across the
//! whole tree, and only then deserializing into typed config.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use super::resolve::{OptionPath, PathVariables};
use super::types::{ProjectConfig, default_paths};
use super::{ConfigError, format_config_error};

/// Config file looked up when none is given on the command line.
pub const DEFAULT_CONFIG_FILE: &str = "assetflow.yaml";

/// The configuration `assetflow init` writes.
pub const DEFAULT_CONFIG: &str = include_str!("default.yaml");

impl ProjectConfig {
    /// Load the config from the command line argument, defaulting to `assetflow.yaml`
    pub async fn load_from_arg(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let config_file = config_file.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
        let config_file = if config_file.is_relative() {
            std::env::current_dir()
                .map_err(ConfigError::CwdFailure)?
                .join(config_file)
        } else {
            config_file.to_path_buf()
        };

        Self::load_from_file(&config_file).await
    }

    /// Load the config from a file path
    pub(crate) async fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        Self::from_yaml_str(&content)
    }

    /// Parse, resolve path templates, deserialize and validate.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: Value = if content.trim().is_empty() {
            Value::Null
        } else {
            serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?
        };

        let mut root = match raw {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            _ => {
                return Err(ConfigError::Parse(
                    "config must be a YAML object, not a scalar or array".to_string(),
                ));
            }
        };

        // User variables extend and override the defaults
        let mut paths = default_paths();
        if let Some(user) = root.remove("paths") {
            let user: BTreeMap<String, Option<String>> = serde_json::from_value(user)
                .map_err(|e| ConfigError::Parse(format!("invalid 'paths': {e}")))?;
            paths.extend(user.into_iter().map(|(k, v)| (k, v.unwrap_or_default())));
        }

        let variables = PathVariables::resolve(&paths)?;
        for (section, value) in root.iter_mut() {
            let mut location = OptionPath::root(section.clone());
            variables.resolve_tree(value, &mut location)?;
        }

        let resolved_paths = serde_json::to_value(variables.values())
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        root.insert("paths".to_string(), resolved_paths);

        let config: ProjectConfig = serde_json::from_value(Value::Object(root))
            .map_err(|e| ConfigError::Validation(format_config_error(e)))?;
        config.validate()?;

        Ok(config)
    }
}
