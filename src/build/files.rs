//! File spec expansion.
//!
//! Turns the Grunt-style `files` entries of a target into concrete
//! `src -> dest` mappings. Traversal order is explicit: patterns are applied in
//! the order they are listed, and the files matched by one pattern are sorted by
//! their slash-separated relative path. Nothing depends on the order the
//! filesystem happens to return directory entries in.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use walkdir::WalkDir;

use super::paths::{file_name, resolve, to_slash};
use crate::config::FileSpec;

#[derive(thiserror::Error, Debug)]
pub enum FilesError {
    #[error("invalid glob pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: globset::Error,
    },

    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },

    #[error("'expand' needs a 'dest' directory (src: {0})")]
    MissingDest(String),
}

/// One unit of work for a tool: source files and where their output goes.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMapping {
    pub src: Vec<PathBuf>,
    pub dest: Option<PathBuf>,
}

/// Expand every spec of a target, in order.
pub fn expand_all(specs: &[FileSpec], base_path: &Path) -> Result<Vec<FileMapping>, FilesError> {
    let mut mappings = Vec::new();
    for spec in specs {
        mappings.extend(expand(spec, base_path)?);
    }
    Ok(mappings)
}

/// Expand a single file spec.
///
/// Without `expand`, all matches form one many-to-one mapping. With `expand`,
/// each matched file gets its own destination under `dest`, keeping its path
/// relative to `cwd` (or only its file name with `flatten`).
pub fn expand(spec: &FileSpec, base_path: &Path) -> Result<Vec<FileMapping>, FilesError> {
    let cwd = match &spec.cwd {
        Some(cwd) => resolve(base_path, cwd),
        None => base_path.to_path_buf(),
    };

    let matched = if spec.literal {
        spec.src.clone()
    } else {
        match_patterns(&cwd, &spec.src, spec.dot)?
    };

    if !spec.expand {
        return Ok(vec![FileMapping {
            src: matched.iter().map(|rel| cwd.join(rel)).collect(),
            dest: spec.dest.as_ref().map(|d| resolve(base_path, d)),
        }]);
    }

    let dest_dir = spec
        .dest
        .as_ref()
        .map(|d| resolve(base_path, d))
        .ok_or_else(|| FilesError::MissingDest(spec.src.join(", ")))?;

    Ok(matched
        .into_iter()
        .map(|rel| {
            let mut target = if spec.flatten || Path::new(&rel).is_absolute() {
                file_name(&rel).to_string()
            } else {
                rel.clone()
            };
            if let Some(ext) = &spec.ext {
                target = replace_extension(&target, ext);
            }
            FileMapping {
                src: vec![cwd.join(&rel)],
                dest: Some(dest_dir.join(target)),
            }
        })
        .collect())
}

/// Match patterns under `cwd`, returning slash-separated paths relative to it.
///
/// Patterns without glob characters are literal paths and are returned whether
/// or not they exist (tools decide what a missing input means). A leading `!`
/// removes earlier matches.
pub fn match_patterns(cwd: &Path, patterns: &[String], dot: bool) -> Result<Vec<String>, FilesError> {
    let mut results: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for pattern in patterns {
        if let Some(negated) = pattern.strip_prefix('!') {
            let matcher = compile(negated)?;
            results.retain(|p| !matcher.is_match(p));
            seen = results.iter().cloned().collect();
            continue;
        }

        if !has_glob_meta(pattern) {
            let literal = pattern.trim_end_matches('/').to_string();
            if seen.insert(literal.clone()) {
                results.push(literal);
            }
            continue;
        }

        let matcher = compile(pattern)?;
        let base = glob_base(pattern);
        let root = cwd.join(&base);
        if !root.exists() {
            continue;
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = entry.map_err(|source| FilesError::Walk {
                path: root.clone(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            // Only the wildcard part of a path is subject to the dotfile rule
            let below_base = entry.path().strip_prefix(&root).unwrap_or(entry.path());
            if !dot && to_slash(below_base).split('/').any(|c| c.starts_with('.')) {
                continue;
            }

            let rel = to_slash(entry.path().strip_prefix(cwd).unwrap_or(entry.path()));
            if matcher.is_match(&rel) {
                found.push(rel);
            }
        }

        found.sort();
        for rel in found {
            if seen.insert(rel.clone()) {
                results.push(rel);
            }
        }
    }

    Ok(results)
}

/// Whether a pattern contains glob syntax.
pub fn has_glob_meta(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// The leading directory components of a pattern that contain no glob syntax.
///
/// # Examples
/// ```ignore
/// glob_base("src/**/*.html") => "src"
/// glob_base("*.html") => ""
/// glob_base("src/scss/**/*.scss") => "src/scss"
/// ```
pub fn glob_base(pattern: &str) -> String {
    let components: Vec<&str> = pattern.split('/').collect();
    let literal: Vec<&str> = components
        .iter()
        .take(components.len().saturating_sub(1))
        .take_while(|c| !has_glob_meta(c))
        .copied()
        .collect();
    literal.join("/")
}

fn compile(pattern: &str) -> Result<GlobMatcher, FilesError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|source| FilesError::Pattern {
            pattern: pattern.to_string(),
            source,
        })
}

fn replace_extension(path: &str, ext: &str) -> String {
    let ext = ext.trim_start_matches('.');
    let (dir, file) = match path.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, path),
    };
    // Grunt replaces everything after the first dot of the file name
    let stem = match file.find('.') {
        Some(0) | None => file,
        Some(i) => &file[..i],
    };
    let renamed = format!("{stem}.{ext}");
    match dir {
        Some(dir) => format!("{dir}/{renamed}"),
        None => renamed,
    }
}
