//! Task registry.
//!
//! Maps task names to their tool, base options and ordered targets. A registry
//! is immutable once built; block extraction produces a new snapshot through
//! [`RegistryBuilder`] instead of mutating the one the pipeline started with.

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::tools::ToolError;
use crate::config::{FileSpec, OrderedMap, Options, ProjectConfig, TargetConfig, TaskConfig};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("unknown task '{0}'")]
    UnknownTask(String),

    #[error("task '{task}' has no target '{target}'")]
    UnknownTarget { task: String, target: String },

    #[error("task '{0}' is registered twice")]
    DuplicateTask(String),

    #[error("task '{task}' already has a target '{target}'")]
    DuplicateTarget { task: String, target: String },

    #[error("invalid stage reference '{0}' (expected 'task' or 'task:target')")]
    InvalidReference(String),

    #[error("option '{key}+' of task '{task}' must be a list appended to a list")]
    Compose { task: String, key: String },
}

/// A parsed `task` or `task:target` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRef {
    pub task: String,
    pub target: Option<String>,
}

impl StageRef {
    pub fn parse(reference: &str) -> Result<Self, RegistryError> {
        let invalid = || RegistryError::InvalidReference(reference.to_string());
        match reference.split_once(':') {
            Some((task, target)) if !task.is_empty() && !target.is_empty() => Ok(Self {
                task: task.to_string(),
                target: Some(target.to_string()),
            }),
            Some(_) => Err(invalid()),
            None if reference.is_empty() => Err(invalid()),
            None => Ok(Self {
                task: reference.to_string(),
                target: None,
            }),
        }
    }
}

/// A registered task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEntry {
    pub tool: String,
    pub options: Options,
    pub targets: OrderedMap<TargetConfig>,
    /// Targets come from block extraction; no targets then means nothing to run
    pub receives_synthesized: bool,
}

/// One runnable unit: a task target with its options merged.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStage {
    pub task: String,
    pub target: Option<String>,
    pub tool: String,
    pub options: Options,
    pub files: Vec<FileSpec>,
}

impl ResolvedStage {
    /// `task:target`, or just `task` for a task without targets.
    pub fn label(&self) -> String {
        match &self.target {
            Some(target) => format!("{}:{}", self.task, target),
            None => self.task.clone(),
        }
    }

    /// Deserialize the merged options into a tool's typed view.
    pub fn options<T: DeserializeOwned>(&self) -> Result<T, ToolError> {
        serde_json::from_value(Value::Object(self.options.clone()))
            .map_err(|e| ToolError::InvalidOptions(e.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskRegistry {
    tasks: OrderedMap<TaskEntry>,
}

impl TaskRegistry {
    /// Register every task declared in the config.
    pub fn from_config(config: &ProjectConfig) -> Result<Self, RegistryError> {
        let mut builder = RegistryBuilder::new();
        for (name, task) in config.tasks.iter() {
            builder.register(name, task.clone())?;
        }
        Ok(builder.build())
    }

    #[cfg(test)]
    pub fn get(&self, task: &str) -> Option<&TaskEntry> {
        self.tasks.get(task)
    }

    pub fn contains(&self, task: &str) -> bool {
        self.tasks.contains_key(task)
    }

    /// Target names of a task in run order.
    #[cfg(test)]
    pub fn targets(&self, task: &str) -> Result<Vec<&str>, RegistryError> {
        let entry = self.entry(task)?;
        Ok(entry.targets.keys().collect())
    }

    /// Resolve one target (or the bare task) with merged options.
    pub fn stage(&self, task: &str, target: Option<&str>) -> Result<ResolvedStage, RegistryError> {
        let entry = self.entry(task)?;

        let (options, files) = match target {
            Some(name) => {
                let config = entry.targets.get(name).ok_or_else(|| RegistryError::UnknownTarget {
                    task: task.to_string(),
                    target: name.to_string(),
                })?;
                (
                    merge_options(task, &entry.options, &config.options)?,
                    config.files.clone(),
                )
            }
            None => (entry.options.clone(), Vec::new()),
        };

        Ok(ResolvedStage {
            task: task.to_string(),
            target: target.map(str::to_string),
            tool: entry.tool.clone(),
            options,
            files,
        })
    }

    /// Everything a stage reference runs.
    ///
    /// `task:target` is one stage. A bare `task` runs all of its targets in
    /// declaration order (static first, then synthesized), or the task itself
    /// once when it has none.
    pub fn expand(&self, reference: &StageRef) -> Result<Vec<ResolvedStage>, RegistryError> {
        if let Some(target) = &reference.target {
            return Ok(vec![self.stage(&reference.task, Some(target))?]);
        }

        let entry = self.entry(&reference.task)?;
        if entry.targets.is_empty() {
            if entry.receives_synthesized {
                return Ok(Vec::new());
            }
            return Ok(vec![self.stage(&reference.task, None)?]);
        }

        entry
            .targets
            .keys()
            .map(|target| self.stage(&reference.task, Some(target)))
            .collect()
    }

    /// Start a new snapshot from this one.
    pub fn to_builder(&self) -> RegistryBuilder {
        RegistryBuilder {
            tasks: self.tasks.clone(),
        }
    }

    fn entry(&self, task: &str) -> Result<&TaskEntry, RegistryError> {
        self.tasks
            .get(task)
            .ok_or_else(|| RegistryError::UnknownTask(task.to_string()))
    }
}

/// Builds a [`TaskRegistry`] snapshot.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    tasks: OrderedMap<TaskEntry>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a statically declared task. Its tool defaults to its name.
    pub fn register(&mut self, name: &str, config: TaskConfig) -> Result<&mut Self, RegistryError> {
        if self.tasks.contains_key(name) {
            return Err(RegistryError::DuplicateTask(name.to_string()));
        }
        self.tasks.insert(
            name,
            TaskEntry {
                tool: config.tool.unwrap_or_else(|| name.to_string()),
                options: config.options,
                targets: config.targets,
                receives_synthesized: false,
            },
        );
        Ok(self)
    }

    /// Mark a task as a flow step, so it runs only the targets synthesized for it.
    pub fn expect_synthesized(&mut self, task: &str) -> Result<&mut Self, RegistryError> {
        let entry = self.entry_mut(task)?;
        entry.receives_synthesized = true;
        Ok(self)
    }

    /// Append a target discovered at run time.
    pub fn inject_synthesized(
        &mut self,
        task: &str,
        target: &str,
        config: TargetConfig,
    ) -> Result<&mut Self, RegistryError> {
        let entry = self.entry_mut(task)?;
        if entry.targets.contains_key(target) {
            return Err(RegistryError::DuplicateTarget {
                task: task.to_string(),
                target: target.to_string(),
            });
        }
        entry.receives_synthesized = true;
        entry.targets.insert(target, config);
        Ok(self)
    }

    pub fn build(self) -> TaskRegistry {
        TaskRegistry { tasks: self.tasks }
    }

    fn entry_mut(&mut self, task: &str) -> Result<&mut TaskEntry, RegistryError> {
        self.tasks
            .get_mut(task)
            .ok_or_else(|| RegistryError::UnknownTask(task.to_string()))
    }
}

/// Merge target options over task options.
///
/// Keys override key by key, recursing into nested mappings. Lists are replaced
/// wholesale; a target key written `key+` appends its list to the base `key`.
pub fn merge_options(task: &str, base: &Options, overrides: &Options) -> Result<Options, RegistryError> {
    let mut merged = base.clone();

    for (key, value) in overrides {
        if let Some(key) = key.strip_suffix('+') {
            let compose = || RegistryError::Compose {
                task: task.to_string(),
                key: key.to_string(),
            };
            let Value::Array(extra) = value else {
                return Err(compose());
            };
            match merged.get_mut(key) {
                Some(Value::Array(list)) => list.extend(extra.iter().cloned()),
                Some(_) => return Err(compose()),
                None => {
                    merged.insert(key.to_string(), value.clone());
                }
            }
            continue;
        }

        if let (Some(Value::Object(existing)), Value::Object(nested)) = (merged.get_mut(key), value) {
            *existing = merge_options(task, existing, nested)?;
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: Value) -> Options {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    fn registry() -> TaskRegistry {
        let config = ProjectConfig::from_yaml_str(
            r#"
tasks:
  compass:
    tool: exec
    options:
      command: sass
      args: [--quiet]
      env: { mode: base, keep: yes }
    targets:
      dev:
        options:
          args: [--style=expanded]
          env: { mode: dev }
      build:
        options:
          args+: [--no-source-map]
  jshint:
    options:
      command: jshint
  concat: {}
"#,
        )
        .unwrap();
        TaskRegistry::from_config(&config).unwrap()
    }

    #[test]
    fn test_stage_ref_parse() {
        assert_eq!(
            StageRef::parse("compass:dev").unwrap(),
            StageRef {
                task: "compass".to_string(),
                target: Some("dev".to_string())
            }
        );
        assert_eq!(StageRef::parse("jshint").unwrap().target, None);
        assert!(StageRef::parse("compass:").is_err());
        assert!(StageRef::parse(":dev").is_err());
        assert!(StageRef::parse("").is_err());
    }

    #[test]
    fn test_tool_defaults_to_task_name() {
        let registry = registry();
        assert_eq!(registry.get("compass").unwrap().tool, "exec");
        assert_eq!(registry.get("jshint").unwrap().tool, "jshint");
    }

    #[test]
    fn test_target_overrides_replace_lists() {
        let stage = registry().stage("compass", Some("dev")).unwrap();
        assert_eq!(stage.options["command"], "sass");
        assert_eq!(stage.options["args"], json!(["--style=expanded"]));
        // Nested mappings merge key by key
        assert_eq!(stage.options["env"], json!({ "mode": "dev", "keep": "yes" }));
        assert_eq!(stage.label(), "compass:dev");
    }

    #[test]
    fn test_plus_suffix_appends() {
        let stage = registry().stage("compass", Some("build")).unwrap();
        assert_eq!(stage.options["args"], json!(["--quiet", "--no-source-map"]));
        assert!(!stage.options.contains_key("args+"));
    }

    #[test]
    fn test_compose_onto_scalar_fails() {
        let base = options(json!({ "command": "sass" }));
        let overrides = options(json!({ "command+": ["x"] }));
        let err = merge_options("compass", &base, &overrides).unwrap_err();
        assert_eq!(
            err,
            RegistryError::Compose {
                task: "compass".to_string(),
                key: "command".to_string()
            }
        );
    }

    #[test]
    fn test_expand_runs_all_targets_in_order() {
        let labels: Vec<String> = registry()
            .expand(&StageRef::parse("compass").unwrap())
            .unwrap()
            .iter()
            .map(ResolvedStage::label)
            .collect();
        assert_eq!(labels, vec!["compass:dev", "compass:build"]);
    }

    #[test]
    fn test_expand_task_without_targets_runs_once() {
        let stages = registry().expand(&StageRef::parse("jshint").unwrap()).unwrap();
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].label(), "jshint");
        assert_eq!(stages[0].options["command"], "jshint");
    }

    #[test]
    fn test_unknown_task_and_target() {
        let registry = registry();
        assert_eq!(
            registry.stage("uglify", None).unwrap_err(),
            RegistryError::UnknownTask("uglify".to_string())
        );
        assert_eq!(
            registry.stage("compass", Some("prod")).unwrap_err().to_string(),
            "task 'compass' has no target 'prod'"
        );
    }

    #[test]
    fn test_synthesized_targets_make_a_new_snapshot() {
        let original = registry();
        let mut builder = original.to_builder();
        builder
            .inject_synthesized(
                "compass",
                "css/site.css",
                TargetConfig {
                    files: vec![FileSpec {
                        src: vec!["a.scss".to_string()],
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            )
            .unwrap();
        let snapshot = builder.build();

        assert_eq!(
            snapshot.targets("compass").unwrap(),
            vec!["dev", "build", "css/site.css"]
        );
        // The original is untouched
        assert_eq!(original.targets("compass").unwrap(), vec!["dev", "build"]);
    }

    #[test]
    fn test_duplicate_synthesized_target() {
        let mut builder = registry().to_builder();
        let err = builder
            .inject_synthesized("compass", "dev", TargetConfig::default())
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTarget { .. }));
    }

    #[test]
    fn test_flow_step_without_blocks_runs_nothing() {
        let mut builder = registry().to_builder();
        builder.expect_synthesized("concat").unwrap();
        let snapshot = builder.build();
        assert!(snapshot.expand(&StageRef::parse("concat").unwrap()).unwrap().is_empty());
        // Before marking, it runs once with base options
        assert_eq!(registry().expand(&StageRef::parse("concat").unwrap()).unwrap().len(), 1);
    }
}
