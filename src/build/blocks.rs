//! Inclusion block extraction.
//!
//! Markup declares which scripts and stylesheets belong together:
//!
//! ```html
//! <!-- build:js js/main.js -->
//! <script src="js/a.js"></script>
//! <script src="js/b.js"></script>
//! <!-- endbuild -->
//!
//! <!-- build:css(.tmp) css/site.css -->
//! <link rel="stylesheet" href="css/site.css">
//! <!-- endbuild -->
//! ```
//!
//! Each block names an output and, optionally, a search path its sources are
//! resolved against. Blocks sharing an output across files are merged in
//! file-then-block order. The resulting [`BlockPlan`] feeds two consumers: the
//! synthesized concat/minify targets, and the reference rewriter.

use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use super::paths::{normalize_output, resolve, with_suffix};
use crate::config::{FileSpec, TargetConfig};

static START_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*build:(\w+)(?:\(([^)]+)\))?\s+(\S+)\s*-->").expect("start marker pattern is valid")
});

static END_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!--\s*endbuild\s*-->").expect("end marker pattern is valid"));

static SCRIPT_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<script\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).expect("script pattern is valid")
});

static LINK_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<link\b[^>]*?\bhref\s*=\s*["']([^"']+)["']"#).expect("link pattern is valid")
});

// =============================================================================
// Types
// =============================================================================

/// What a block bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Script,
    Style,
}

impl AssetKind {
    /// Parse the kind written in a start marker.
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "js" | "script" => Some(Self::Script),
            "css" | "style" => Some(Self::Style),
            _ => None,
        }
    }

    /// Directory bare output names are placed in, and the key of the kind's flow.
    pub fn directory(&self) -> &'static str {
        match self {
            Self::Script => "js",
            Self::Style => "css",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script => f.write_str("script"),
            Self::Style => f.write_str("style"),
        }
    }
}

/// One `build:` ... `endbuild` region of a markup file.
#[derive(Debug, Clone, PartialEq)]
pub struct InclusionBlock {
    pub kind: AssetKind,
    /// Output as written in the start marker
    pub output: String,
    /// Directory sources are resolved against, from `build:js(<dir>)`
    pub search_path: Option<String>,
    /// `src`/`href` references in document order
    pub sources: Vec<String>,
    /// Byte range from the start of the start marker to the end of the end marker
    pub range: Range<usize>,
    /// 1-based line of the start marker
    pub line: usize,
    /// The block as it appeared in the file
    pub text: String,
}

impl InclusionBlock {
    /// Output path relative to the distribution root.
    pub fn normalized_output(&self) -> String {
        normalize_output(&self.output, self.kind)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum BlockError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{file}:{line}: endbuild without a matching build marker")]
    UnmatchedEnd { file: PathBuf, line: usize },

    #[error("{file}:{line}: build block for '{output}' is never closed")]
    Unterminated {
        file: PathBuf,
        line: usize,
        output: String,
    },

    #[error("{file}:{line}: build block for '{output}' starts inside the block opened on line {outer}")]
    Nested {
        file: PathBuf,
        line: usize,
        output: String,
        outer: usize,
    },

    #[error("{file}:{line}: unknown build block kind '{kind}' (expected js, script, css or style)")]
    UnknownKind {
        file: PathBuf,
        line: usize,
        kind: String,
    },

    #[error("{file}:{line}: output '{output}' is declared as {kind} here but as {previous} earlier")]
    KindConflict {
        file: PathBuf,
        line: usize,
        output: String,
        kind: AssetKind,
        previous: AssetKind,
    },

    #[error("{file}:{line}: no flow configured for {kind} blocks")]
    MissingFlow {
        file: PathBuf,
        line: usize,
        kind: AssetKind,
    },
}

// =============================================================================
// Parsing
// =============================================================================

enum Marker<'a> {
    Start {
        kind: &'a str,
        search_path: Option<&'a str>,
        output: &'a str,
    },
    End,
}

/// Scan one markup file for inclusion blocks.
///
/// `file` is only used in error messages.
pub fn parse_blocks(file: &Path, content: &str) -> Result<Vec<InclusionBlock>, BlockError> {
    let mut markers: Vec<(Range<usize>, Marker)> = Vec::new();
    for caps in START_MARKER.captures_iter(content) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        markers.push((
            whole.range(),
            Marker::Start {
                kind: caps.get(1).map_or("", |m| m.as_str()),
                search_path: caps.get(2).map(|m| m.as_str().trim()),
                output: caps.get(3).map_or("", |m| m.as_str()),
            },
        ));
    }
    for m in END_MARKER.find_iter(content) {
        markers.push((m.range(), Marker::End));
    }
    markers.sort_by_key(|(range, _)| range.start);

    let line_of = |offset: usize| content[..offset].matches('\n').count() + 1;

    // Open blocks: (start marker range, kind, search path, output, line)
    let mut open: Vec<(Range<usize>, AssetKind, Option<String>, String, usize)> = Vec::new();
    let mut blocks = Vec::new();

    for (range, marker) in markers {
        match marker {
            Marker::Start {
                kind,
                search_path,
                output,
            } => {
                let line = line_of(range.start);
                if let Some((_, _, _, _, outer)) = open.last() {
                    return Err(BlockError::Nested {
                        file: file.to_path_buf(),
                        line,
                        output: output.to_string(),
                        outer: *outer,
                    });
                }
                let kind = AssetKind::parse(kind).ok_or_else(|| BlockError::UnknownKind {
                    file: file.to_path_buf(),
                    line,
                    kind: kind.to_string(),
                })?;
                open.push((
                    range,
                    kind,
                    search_path.map(str::to_string),
                    output.to_string(),
                    line,
                ));
            }
            Marker::End => {
                let Some((start, kind, search_path, output, line)) = open.pop() else {
                    return Err(BlockError::UnmatchedEnd {
                        file: file.to_path_buf(),
                        line: line_of(range.start),
                    });
                };

                let inner = &content[start.end..range.start];
                let pattern = match kind {
                    AssetKind::Script => &*SCRIPT_SRC,
                    AssetKind::Style => &*LINK_HREF,
                };
                let sources = pattern
                    .captures_iter(inner)
                    .filter_map(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string())
                    .collect();

                let block_range = start.start..range.end;
                blocks.push(InclusionBlock {
                    kind,
                    output,
                    search_path,
                    sources,
                    text: content[block_range.clone()].to_string(),
                    range: block_range,
                    line,
                });
            }
        }
    }

    if let Some((_, _, _, output, line)) = open.pop() {
        return Err(BlockError::Unterminated {
            file: file.to_path_buf(),
            line,
            output,
        });
    }

    Ok(blocks)
}

// =============================================================================
// Planning
// =============================================================================

/// How one kind of block output is produced.
///
/// ```yaml
/// flow:
///   js:
///     steps: [concat, uglify]
///     search_path: "{{ app }}"
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FlowConfig {
    /// Task names the output passes through, in order
    pub steps: Vec<String>,
    /// Directory sources are resolved against when the block names none
    #[serde(default)]
    pub search_path: Option<String>,
    /// Inserted before the artifact's extension when the flow has more than one step
    #[serde(default = "default_min_suffix")]
    pub min_suffix: String,
}

fn default_min_suffix() -> String {
    ".min".to_string()
}

impl FlowConfig {
    /// Artifact path, relative to the distribution root, for a normalized output.
    pub fn artifact(&self, normalized_output: &str) -> String {
        if self.steps.len() > 1 {
            with_suffix(normalized_output, &self.min_suffix)
        } else {
            normalized_output.to_string()
        }
    }
}

/// Flows per kind.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Flows {
    #[serde(default)]
    pub js: Option<FlowConfig>,
    #[serde(default)]
    pub css: Option<FlowConfig>,
}

impl Flows {
    pub fn for_kind(&self, kind: AssetKind) -> Option<&FlowConfig> {
        match kind {
            AssetKind::Script => self.js.as_ref(),
            AssetKind::Style => self.css.as_ref(),
        }
    }

    /// Every task a flow step names.
    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.js
            .iter()
            .chain(self.css.iter())
            .flat_map(|flow| flow.steps.iter().map(String::as_str))
    }
}

/// A markup file and the blocks found in it.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkupFile {
    /// Where the file was read from
    pub path: PathBuf,
    /// Path relative to the pattern's `cwd`, which is also where its copy lands
    pub relative: String,
    pub blocks: Vec<InclusionBlock>,
}

/// All blocks sharing one output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputGroup {
    pub kind: AssetKind,
    /// Output relative to the distribution root (`js/main.js`)
    pub output: String,
    /// Final file relative to the distribution root (`js/main.min.js`)
    pub artifact: String,
    /// Resolved sources in file-then-block order
    pub sources: Vec<PathBuf>,
}

/// A target generated from a block output, to be injected into `task`.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedTarget {
    pub task: String,
    pub target: String,
    pub config: TargetConfig,
}

/// Everything block extraction learned about a set of markup files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockPlan {
    /// Markup files in traversal order, including those without blocks
    pub files: Vec<MarkupFile>,
    /// One group per distinct output, in order of first appearance
    pub outputs: Vec<OutputGroup>,
}

impl BlockPlan {
    /// Group the blocks of `files` by output and resolve their sources.
    pub fn new(files: Vec<MarkupFile>, flows: &Flows, base_path: &Path) -> Result<Self, BlockError> {
        let mut outputs: Vec<OutputGroup> = Vec::new();

        for file in &files {
            let markup_dir = file.path.parent().unwrap_or(Path::new(""));
            for block in &file.blocks {
                let flow = flows.for_kind(block.kind).ok_or_else(|| BlockError::MissingFlow {
                    file: file.path.clone(),
                    line: block.line,
                    kind: block.kind,
                })?;

                let search_dir = match (&block.search_path, &flow.search_path) {
                    (Some(dir), _) | (None, Some(dir)) => resolve(base_path, dir),
                    (None, None) => markup_dir.to_path_buf(),
                };
                let sources = block.sources.iter().map(|r| resolve_source(&search_dir, r));

                let output = block.normalized_output();
                match outputs.iter_mut().find(|g| g.output == output) {
                    Some(group) if group.kind != block.kind => {
                        return Err(BlockError::KindConflict {
                            file: file.path.clone(),
                            line: block.line,
                            output,
                            kind: block.kind,
                            previous: group.kind,
                        });
                    }
                    Some(group) => group.sources.extend(sources),
                    None => outputs.push(OutputGroup {
                        kind: block.kind,
                        artifact: flow.artifact(&output),
                        sources: sources.collect(),
                        output,
                    }),
                }
            }
        }

        Ok(Self { files, outputs })
    }

    /// The group a block contributes to.
    pub fn group_for(&self, block: &InclusionBlock) -> Option<&OutputGroup> {
        let output = block.normalized_output();
        self.outputs.iter().find(|g| g.output == output)
    }

    pub fn block_count(&self) -> usize {
        self.files.iter().map(|f| f.blocks.len()).sum()
    }

    /// Targets for every flow step of every output.
    ///
    /// The first step reads the block sources. Intermediate steps write to
    /// `<staging>/<step>/<output>`; the last writes `<dest>/<artifact>`.
    pub fn synthesize(&self, flows: &Flows, dest: &Path, staging: &Path) -> Vec<SynthesizedTarget> {
        let mut targets = Vec::new();

        for group in &self.outputs {
            let Some(flow) = flows.for_kind(group.kind) else {
                continue;
            };

            let mut inputs: Vec<String> = group.sources.iter().map(|p| path_string(p)).collect();
            for (i, step) in flow.steps.iter().enumerate() {
                let output = if i + 1 == flow.steps.len() {
                    dest.join(&group.artifact)
                } else {
                    staging.join(step).join(&group.output)
                };

                targets.push(SynthesizedTarget {
                    task: step.clone(),
                    target: group.output.clone(),
                    config: TargetConfig {
                        options: Default::default(),
                        files: vec![FileSpec {
                            src: inputs,
                            dest: Some(path_string(&output)),
                            literal: true,
                            ..Default::default()
                        }],
                    },
                });
                inputs = vec![path_string(&output)];
            }
        }

        targets
    }
}

/// Resolve a markup reference against a search directory.
///
/// Leading slashes, query strings and fragments are dropped.
fn resolve_source(search_dir: &Path, reference: &str) -> PathBuf {
    let reference = reference.split(['?', '#']).next().unwrap_or(reference);
    search_dir.join(reference.trim_start_matches('/'))
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
