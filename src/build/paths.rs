//! Path utilities.
//!
//! This module handles conversions between:
//! - Config-relative paths (everything in `assetflow.yaml` is relative to its directory)
//! - Declared block outputs (`main.js`, `css/site.css`)
//! - Artifact paths (what a block output becomes in the distribution tree)

use std::path::{Component, Path, PathBuf};

use super::blocks::AssetKind;

/// Get the base path from a config file path (its parent directory).
pub fn base_path_from_config(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Resolve a config-relative path against the base path.
pub fn resolve(base_path: &Path, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_relative() {
        base_path.join(path)
    } else {
        path.to_path_buf()
    }
}

/// Render a path with forward slashes, for glob matching and markup references.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            Component::RootDir | Component::Prefix(_) | Component::CurDir => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Normalize a declared block output to a path relative to the distribution root.
///
/// Leading slashes are dropped, and a bare file name is placed under the kind's
/// directory.
///
/// # Examples
/// ```ignore
/// normalize_output("main.js", AssetKind::Script) => "js/main.js"
/// normalize_output("/css/site.css", AssetKind::Style) => "css/site.css"
/// normalize_output("scripts/app.js", AssetKind::Script) => "scripts/app.js"
/// ```
pub fn normalize_output(output: &str, kind: AssetKind) -> String {
    let trimmed = output.trim_start_matches('/');
    if trimmed.contains('/') {
        trimmed.to_string()
    } else {
        format!("{}/{}", kind.directory(), trimmed)
    }
}

/// Insert a suffix before the file extension, unless it is already there.
///
/// # Examples
/// ```ignore
/// with_suffix("js/main.js", ".min") => "js/main.min.js"
/// with_suffix("js/main.min.js", ".min") => "js/main.min.js"
/// with_suffix("LICENSE", ".min") => "LICENSE.min"
/// ```
pub fn with_suffix(path: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        return path.to_string();
    }

    let (dir, file) = match path.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, path),
    };

    let renamed = match file.rsplit_once('.') {
        Some((stem, _)) if stem.ends_with(suffix) => file.to_string(),
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}{suffix}.{ext}"),
        _ => format!("{file}{suffix}"),
    };

    match dir {
        Some(dir) => format!("{dir}/{renamed}"),
        None => renamed,
    }
}

/// The last path segment of a slash-separated path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_path_from_config() {
        assert_eq!(
            base_path_from_config(Path::new("/project/assetflow.yaml")),
            PathBuf::from("/project")
        );
        assert_eq!(
            base_path_from_config(Path::new("assetflow.yaml")),
            PathBuf::from("")
        );
    }

    #[test]
    fn test_resolve() {
        let base = Path::new("/project");
        assert_eq!(resolve(base, "src/js"), PathBuf::from("/project/src/js"));
        assert_eq!(resolve(base, "/abs/out"), PathBuf::from("/abs/out"));
    }

    #[test]
    fn test_to_slash() {
        assert_eq!(to_slash(Path::new("./css/main.css")), "css/main.css");
        assert_eq!(to_slash(Path::new("a/../b")), "a/../b");
    }

    #[test]
    fn test_normalize_output() {
        assert_eq!(normalize_output("main.js", AssetKind::Script), "js/main.js");
        assert_eq!(normalize_output("site.css", AssetKind::Style), "css/site.css");
        assert_eq!(normalize_output("/css/site.css", AssetKind::Style), "css/site.css");
        assert_eq!(
            normalize_output("scripts/app.js", AssetKind::Script),
            "scripts/app.js"
        );
    }

    #[test]
    fn test_with_suffix() {
        assert_eq!(with_suffix("js/main.js", ".min"), "js/main.min.js");
        assert_eq!(with_suffix("js/main.min.js", ".min"), "js/main.min.js");
        assert_eq!(with_suffix("main.js", ".min"), "main.min.js");
        assert_eq!(with_suffix("LICENSE", ".min"), "LICENSE.min");
        assert_eq!(with_suffix("js/main.js", ""), "js/main.js");
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("js/vendor/main.min.js"), "main.min.js");
        assert_eq!(file_name("main.js"), "main.js");
    }
}
