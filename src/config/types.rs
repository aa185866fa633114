//! Configuration type definitions.
//!
//! This module contains all the data structures used in assetflow configuration files.
//! These types are pure data - no I/O or complex logic.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Free-form option tree handed to a tool. Tools deserialize their own typed view.
pub type Options = serde_json::Map<String, serde_json::Value>;

// =============================================================================
// Ordered map
// =============================================================================

/// A string-keyed mapping that keeps the order entries were declared in.
///
/// Targets of a task run in declaration order, so plain hash maps won't do.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<T>(Vec<(String, T)>);

impl<T> OrderedMap<T> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut T> {
        self.0.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace an entry. New keys go to the end.
    pub fn insert(&mut self, key: impl Into<String>, value: T) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T> Default for OrderedMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<(String, T)> for OrderedMap<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for OrderedMap<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OrderedMapVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<T> {
            type Value = OrderedMap<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping")
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(OrderedMap::new())
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                use serde::de::Error;

                let mut entries: Vec<(String, T)> = Vec::new();
                while let Some((key, value)) = access.next_entry::<String, T>()? {
                    if entries.iter().any(|(k, _)| *k == key) {
                        return Err(A::Error::custom(format!("duplicate key '{key}'")));
                    }
                    entries.push((key, value));
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_any(OrderedMapVisitor(PhantomData))
    }
}

impl<T: Serialize> Serialize for OrderedMap<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

// =============================================================================
// Project configuration
// =============================================================================

/// The whole `assetflow.yaml` after path templates have been resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Symbolic path variables (`app`, `dist`, `vendorLib`, `temp`, `cdn`, ...)
    #[serde(default = "default_paths")]
    pub paths: BTreeMap<String, String>,
    /// Task declarations, keyed by task name
    #[serde(default)]
    pub tasks: OrderedMap<TaskConfig>,
    /// Named pipelines (conventionally `dev` and `build`)
    #[serde(default)]
    pub pipelines: OrderedMap<PipelineConfig>,
    /// File watching rules for the dev pipeline
    #[serde(default)]
    pub watch: WatchConfig,
    /// Dev server profiles, referenced by `pipelines.<name>.serve`
    #[serde(default)]
    pub server: OrderedMap<ServerProfile>,
}

pub(crate) fn default_paths() -> BTreeMap<String, String> {
    [
        ("app", "src"),
        ("dist", "build"),
        ("vendorLib", "lib"),
        ("temp", ".tmp"),
        ("cdn", ""),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

// =============================================================================
// Tasks
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Tool that runs this task (defaults to the task name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Base options shared by every target
    #[serde(default, skip_serializing_if = "Options::is_empty")]
    pub options: Options,
    /// Named targets, run in declaration order
    #[serde(default, skip_serializing_if = "OrderedMap::is_empty")]
    pub targets: OrderedMap<TargetConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Option overrides merged over the task's base options
    #[serde(default, skip_serializing_if = "Options::is_empty")]
    pub options: Options,
    /// Files this target operates on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileSpec>,
}

/// A Grunt-style file specification.
///
/// ```yaml
/// # many-to-one
/// - src: ["src/js/a.js", "src/js/b.js"]
///   dest: build/js/main.js
///
/// # one-to-one, relative to cwd
/// - expand: true
///   cwd: src
///   src: ["*.html", "img/**/*.png"]
///   dest: build
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileSpec {
    /// Directory patterns are matched relative to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Glob patterns or literal paths; a leading `!` excludes
    #[serde(deserialize_with = "one_or_many")]
    pub src: Vec<String>,
    /// Destination file, or directory when `expand` is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,
    /// Map each matched file to its own destination under `dest`
    #[serde(default, skip_serializing_if = "is_false")]
    pub expand: bool,
    /// Drop directories from expanded destination paths
    #[serde(default, skip_serializing_if = "is_false")]
    pub flatten: bool,
    /// Replace the extension of expanded destination paths
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
    /// Let patterns match dotfiles
    #[serde(default, skip_serializing_if = "is_false")]
    pub dot: bool,
    /// Take `src` entries as exact paths, in order and with repeats
    #[serde(default, skip_serializing_if = "is_false")]
    pub literal: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Accept either a single string or a list of strings.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

// =============================================================================
// Pipelines
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Stage invocations in declared order
    pub stages: Vec<StageEntry>,
    /// Server profile to start once the stages complete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serve: Option<String>,
    /// Start the file watcher once the stages complete
    #[serde(default, skip_serializing_if = "is_false")]
    pub watch: bool,
}

/// A stage entry in a pipeline.
///
/// ```yaml
/// stages:
///   - clean:build                 # plain reference
///   - run: cssmin                 # reference with data dependencies
///     consumes: [condensed-css]
///     produces: [minified-css]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageEntry {
    /// `task` or `task:target`
    Plain(String),
    /// A reference with declared file-set labels
    Detailed {
        run: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        produces: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        consumes: Vec<String>,
    },
}

impl StageEntry {
    pub fn reference(&self) -> &str {
        match self {
            StageEntry::Plain(run) => run,
            StageEntry::Detailed { run, .. } => run,
        }
    }

    pub fn produces(&self) -> &[String] {
        match self {
            StageEntry::Plain(_) => &[],
            StageEntry::Detailed { produces, .. } => produces,
        }
    }

    pub fn consumes(&self) -> &[String] {
        match self {
            StageEntry::Plain(_) => &[],
            StageEntry::Detailed { consumes, .. } => consumes,
        }
    }
}

// =============================================================================
// Watch configuration
// =============================================================================

/// Configuration for file watching during development.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Use polling-based watcher instead of native file system events.
    /// Useful for network filesystems, Docker volumes, or other situations
    /// where native events are unreliable.
    #[serde(default)]
    pub poll: bool,
    /// Poll interval in milliseconds (only used if poll=true).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Debounce window in milliseconds applied to every rule that doesn't set its own.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Push a reload to connected browsers after each successful run.
    #[serde(default = "default_live_reload")]
    pub live_reload: bool,
    /// Watch rules, keyed by rule name
    #[serde(default)]
    pub rules: OrderedMap<WatchRuleConfig>,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_live_reload() -> bool {
    true
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll: false,
            poll_interval_ms: default_poll_interval_ms(),
            debounce_ms: default_debounce_ms(),
            live_reload: default_live_reload(),
            rules: OrderedMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchRuleConfig {
    /// Globs (relative to the config file) this rule reacts to
    #[serde(deserialize_with = "one_or_many")]
    pub files: Vec<String>,
    /// Stage references to re-run; empty means reload only
    #[serde(default)]
    pub tasks: Vec<String>,
    /// Per-rule debounce override in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,
}

// =============================================================================
// Server profiles
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerProfile {
    /// Directory to serve
    pub root: String,
    #[serde(default = "default_hostname")]
    pub hostname: String,
    pub port: u16,
    /// Open the site in the default browser
    #[serde(default)]
    pub open: bool,
    /// Expose the live reload channel and inject its client script
    #[serde(default = "default_live_reload")]
    pub live_reload: bool,
}

fn default_hostname() -> String {
    "localhost".to_string()
}
