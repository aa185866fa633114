//! Path template resolution.
//!
//! Path variables (`paths:` in the config file) may reference each other with
//! Tera expressions (`dist: "{{ app }}/../build"`). They are resolved to a fixed
//! point once per invocation, then every string in the rest of the configuration
//! tree is rendered against them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tera::{Context, Tera};

use super::ConfigError;

/// Matches the leading identifier of every `{{ ... }}` expression.
static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{-?\s*([A-Za-z_][A-Za-z0-9_]*)").expect("reference pattern is valid")
});

/// Where in the configuration a template string lives, for error messages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionPath(Vec<String>);

impl OptionPath {
    pub fn root(segment: impl Into<String>) -> Self {
        Self(vec![segment.into()])
    }

    fn push(&mut self, segment: impl Into<String>) {
        self.0.push(segment.into());
    }

    fn pop(&mut self) {
        self.0.pop();
    }
}

impl fmt::Display for OptionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [section, task, rest @ ..] if section == "tasks" => {
                write!(f, "in task '{task}'")?;
                if !rest.is_empty() {
                    write!(f, " at {}", rest.join("."))?;
                }
                Ok(())
            }
            segments => write!(f, "at {}", segments.join(".")),
        }
    }
}

/// Fully resolved path variables.
#[derive(Debug, Clone, PartialEq)]
pub struct PathVariables {
    values: BTreeMap<String, String>,
}

impl PathVariables {
    /// Resolve raw variable templates until none reference another variable.
    ///
    /// Fails on references to undefined variables and on cycles, including a
    /// variable referencing itself.
    pub fn resolve(raw: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        for (name, value) in raw {
            for reference in references(value) {
                if !raw.contains_key(&reference) {
                    return Err(ConfigError::UndefinedVariable {
                        variable: reference,
                        location: OptionPath(vec!["paths".into(), name.clone()]),
                    });
                }
            }
        }

        if let Some(chain) = find_cycle(raw) {
            return Err(ConfigError::CyclicVariable(chain.join(" -> ")));
        }

        // Each pass resolves at least one more level of nesting, so an acyclic
        // set converges within `len + 1` passes.
        let max_passes = raw.len() + 1;
        let mut current = raw.clone();
        for _ in 0..max_passes {
            if current.values().all(|v| !is_template(v)) {
                return Ok(Self { values: current });
            }

            let context = context_for(&current);
            let mut next = BTreeMap::new();
            for (name, value) in &current {
                let rendered = if is_template(value) {
                    render(value, &context)
                        .map_err(|source| ConfigError::Template {
                            location: OptionPath(vec!["paths".into(), name.clone()]),
                            source,
                        })?
                } else {
                    value.clone()
                };
                next.insert(name.clone(), rendered);
            }
            current = next;
        }

        Err(ConfigError::Unresolved(max_passes))
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Render a single template string against the resolved variables.
    pub fn render(&self, template: &str, location: &OptionPath) -> Result<String, ConfigError> {
        if !is_template(template) {
            return Ok(template.to_string());
        }

        for reference in references(template) {
            if !self.values.contains_key(&reference) {
                return Err(ConfigError::UndefinedVariable {
                    variable: reference,
                    location: location.clone(),
                });
            }
        }

        render(template, &context_for(&self.values)).map_err(|source| ConfigError::Template {
            location: location.clone(),
            source,
        })
    }

    /// Render every string in a configuration tree in place.
    ///
    /// `location` is the path of `value` itself; it grows as the walk descends.
    pub fn resolve_tree(&self, value: &mut Value, location: &mut OptionPath) -> Result<(), ConfigError> {
        match value {
            Value::String(s) => {
                *s = self.render(s, location)?;
            }
            Value::Array(items) => {
                for (i, item) in items.iter_mut().enumerate() {
                    location.push(i.to_string());
                    self.resolve_tree(item, location)?;
                    location.pop();
                }
            }
            Value::Object(map) => {
                for (key, item) in map.iter_mut() {
                    location.push(key.clone());
                    self.resolve_tree(item, location)?;
                    location.pop();
                }
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
        Ok(())
    }
}

fn is_template(s: &str) -> bool {
    s.contains("{{") || s.contains("{%")
}

/// Names of the variables a template refers to, in order of appearance.
fn references(template: &str) -> Vec<String> {
    REFERENCE
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

fn context_for(values: &BTreeMap<String, String>) -> Context {
    let mut context = Context::new();
    for (name, value) in values {
        context.insert(name, value);
    }
    context
}

fn render(template: &str, context: &Context) -> Result<String, tera::Error> {
    Tera::one_off(template, context, false)
}

/// Depth-first search for a reference cycle. Returns the chain, closing name included.
fn find_cycle(raw: &BTreeMap<String, String>) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        name: &str,
        raw: &BTreeMap<String, String>,
        marks: &mut BTreeMap<String, Mark>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        match marks.get(name) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|n| n == name).unwrap_or(0);
                let mut chain = stack[start..].to_vec();
                chain.push(name.to_string());
                return Some(chain);
            }
            None => {}
        }

        marks.insert(name.to_string(), Mark::Visiting);
        stack.push(name.to_string());
        if let Some(value) = raw.get(name) {
            for reference in references(value) {
                if let Some(chain) = visit(&reference, raw, marks, stack) {
                    return Some(chain);
                }
            }
        }
        stack.pop();
        marks.insert(name.to_string(), Mark::Done);
        None
    }

    let mut marks = BTreeMap::new();
    for name in raw.keys() {
        let mut stack = Vec::new();
        if let Some(chain) = visit(name, raw, &mut marks, &mut stack) {
            return Some(chain);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_resolves_nested_references() {
        let raw = vars(&[
            ("app", "src"),
            ("styles", "{{ assets }}/css"),
            ("assets", "{{ app }}/assets"),
        ]);
        let resolved = PathVariables::resolve(&raw).unwrap();
        assert_eq!(resolved.get("styles"), Some("src/assets/css"));
        assert_eq!(resolved.get("assets"), Some("src/assets"));
        assert_eq!(resolved.get("app"), Some("src"));
    }

    #[test]
    fn test_deep_chain_converges() {
        let raw = vars(&[
            ("a", "{{ b }}/a"),
            ("b", "{{ c }}/b"),
            ("c", "{{ d }}/c"),
            ("d", "{{ e }}/d"),
            ("e", "root"),
        ]);
        let resolved = PathVariables::resolve(&raw).unwrap();
        assert_eq!(resolved.get("a"), Some("root/d/c/b/a"));
    }

    #[test]
    fn test_self_reference_is_cyclic() {
        let raw = vars(&[("app", "{{ app }}/src")]);
        let err = PathVariables::resolve(&raw).unwrap_err();
        assert!(matches!(err, ConfigError::CyclicVariable(ref chain) if chain == "app -> app"));
    }

    #[test]
    fn test_transitive_cycle() {
        let raw = vars(&[("a", "{{ b }}"), ("b", "{{ c }}"), ("c", "x/{{ a }}")]);
        let err = PathVariables::resolve(&raw).unwrap_err();
        match err {
            ConfigError::CyclicVariable(chain) => assert_eq!(chain, "a -> b -> c -> a"),
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_undefined_variable_in_paths() {
        let raw = vars(&[("dist", "{{ output }}/dist")]);
        let err = PathVariables::resolve(&raw).unwrap_err();
        assert_eq!(
            err.to_string(),
            "undefined path variable 'output' referenced at paths.dist"
        );
    }

    #[test]
    fn test_resolve_tree_replaces_every_placeholder() {
        let resolved = PathVariables::resolve(&vars(&[("app", "src"), ("dist", "build")])).unwrap();
        let mut tree = json!({
            "compass": {
                "targets": {
                    "dev": {
                        "options": { "sassDir": "{{ app }}/scss", "level": 3 },
                        "files": [{ "src": ["{{ app }}/*.html", "img/*.{png,jpg}"], "dest": "{{ dist }}" }]
                    }
                }
            }
        });

        let mut location = OptionPath::root("tasks");
        resolved.resolve_tree(&mut tree, &mut location).unwrap();

        let dev = &tree["compass"]["targets"]["dev"];
        assert_eq!(dev["options"]["sassDir"], "src/scss");
        assert_eq!(dev["options"]["level"], 3);
        assert_eq!(dev["files"][0]["src"][0], "src/*.html");
        assert_eq!(dev["files"][0]["src"][1], "img/*.{png,jpg}");
        assert_eq!(dev["files"][0]["dest"], "build");
    }

    #[test]
    fn test_undefined_variable_names_task_and_option() {
        let resolved = PathVariables::resolve(&vars(&[("app", "src")])).unwrap();
        let mut tree = json!({
            "compass": { "targets": { "dev": { "options": { "cssDir": "{{ tmp }}/css" } } } }
        });

        let mut location = OptionPath::root("tasks");
        let err = resolved.resolve_tree(&mut tree, &mut location).unwrap_err();
        assert_eq!(
            err.to_string(),
            "undefined path variable 'tmp' referenced in task 'compass' at targets.dev.options.cssDir"
        );
    }

    #[test]
    fn test_filters_are_allowed() {
        let resolved = PathVariables::resolve(&vars(&[("cdn", "https://cdn.example.com/")])).unwrap();
        let rendered = resolved
            .render(
                "{{ cdn | trim_end_matches(pat='/') }}/assets",
                &OptionPath::root("x"),
            )
            .unwrap();
        assert_eq!(rendered, "https://cdn.example.com/assets");
    }

    #[test]
    fn test_plain_strings_are_untouched() {
        let resolved = PathVariables::resolve(&BTreeMap::new()).unwrap();
        let s = "{,*/}*.html";
        assert_eq!(resolved.render(s, &OptionPath::root("x")).unwrap(), s);
    }
}
