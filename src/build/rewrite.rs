//! Reference rewriting.
//!
//! Once the artifacts exist, each inclusion block in the distributed copy of a
//! markup file is replaced by a single reference to its artifact. Only the
//! recorded block ranges change. Stylesheets can have their relative `url()`
//! references flattened or prefixed for a content host.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::blocks::{AssetKind, BlockPlan, InclusionBlock, MarkupFile, OutputGroup};
use super::paths::file_name;

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*(['"]?)([^'")]+?)(['"]?)\s*\)"#).expect("url pattern is valid")
});

#[derive(thiserror::Error, Debug)]
pub enum RewriteError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("missing artifact {path} for block output '{output}' in {markup}")]
    MissingArtifact {
        path: PathBuf,
        output: String,
        markup: PathBuf,
    },

    #[error("{markup}: the block from line {line} of the source markup is not where it was found")]
    StaleMarkup { markup: PathBuf, line: usize },
}

/// How references are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RewriteOptions {
    /// Prefix for every rewritten reference, e.g. `https://cdn.example.com/app`
    pub cdn: String,
    /// Keep only the file name of a reference
    pub flatten: bool,
}

impl RewriteOptions {
    fn apply_cdn(&self, reference: &str) -> String {
        if self.cdn.is_empty() {
            return reference.to_string();
        }
        format!(
            "{}/{}",
            self.cdn.trim_end_matches('/'),
            reference.trim_start_matches('/')
        )
    }
}

/// Rewrites files under the distribution root.
pub struct Rewriter {
    root: PathBuf,
    options: RewriteOptions,
}

impl Rewriter {
    pub fn new(root: PathBuf, options: RewriteOptions) -> Self {
        Self { root, options }
    }

    /// The reference a block is replaced with.
    pub fn reference(&self, block: &InclusionBlock, group: &OutputGroup) -> String {
        let reference = if self.options.flatten {
            file_name(&group.artifact).to_string()
        } else if block.output.starts_with('/') {
            format!("/{}", group.artifact)
        } else {
            group.artifact.clone()
        };
        self.options.apply_cdn(&reference)
    }

    /// Replace every block of one markup file's distributed copy.
    ///
    /// Returns the path written, or `None` when the file has no blocks.
    pub fn rewrite_markup(&self, plan: &BlockPlan, file: &MarkupFile) -> Result<Option<PathBuf>, RewriteError> {
        if file.blocks.is_empty() {
            return Ok(None);
        }

        let path = self.root.join(&file.relative);
        let content = std::fs::read_to_string(&path).map_err(|source| RewriteError::Read {
            path: path.clone(),
            source,
        })?;

        let mut replacements = Vec::with_capacity(file.blocks.len());
        for block in &file.blocks {
            let Some(group) = plan.group_for(block) else {
                continue;
            };

            let artifact = self.root.join(&group.artifact);
            if !artifact.is_file() {
                return Err(RewriteError::MissingArtifact {
                    path: artifact,
                    output: block.output.clone(),
                    markup: file.path.clone(),
                });
            }

            replacements.push(Replacement {
                range: block.range.clone(),
                expected: &block.text,
                line: block.line,
                text: render_reference(block.kind, &self.reference(block, group)),
            });
        }

        let rewritten = apply_replacements(&content, &mut replacements)
            .map_err(|line| RewriteError::StaleMarkup {
                markup: path.clone(),
                line,
            })?;

        std::fs::write(&path, rewritten).map_err(|source| RewriteError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(Some(path))
    }

    /// Rewrite relative `url()` references of a stylesheet.
    ///
    /// Returns whether the file changed. Without `flatten` or `cdn` there is
    /// nothing to do.
    pub fn rewrite_stylesheet(&self, path: &Path) -> Result<bool, RewriteError> {
        if !self.options.flatten && self.options.cdn.is_empty() {
            return Ok(false);
        }

        let content = std::fs::read_to_string(path).map_err(|source| RewriteError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let rewritten = self.rewrite_css(&content);
        if rewritten == content {
            return Ok(false);
        }

        std::fs::write(path, rewritten).map_err(|source| RewriteError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(true)
    }

    fn rewrite_css(&self, content: &str) -> String {
        CSS_URL
            .replace_all(content, |caps: &Captures| {
                let url = &caps[2];
                if is_external(url) {
                    return caps[0].to_string();
                }

                let mut relative = url;
                loop {
                    if let Some(rest) = relative.strip_prefix("./") {
                        relative = rest;
                    } else if let Some(rest) = relative.strip_prefix("../") {
                        relative = rest;
                    } else {
                        break;
                    }
                }
                let reference = if self.options.flatten {
                    file_name(relative)
                } else {
                    relative
                };
                format!("url({0}{1}{0})", &caps[1], self.options.apply_cdn(reference))
            })
            .into_owned()
    }
}

/// Absolute, protocol, data and fragment URLs are left alone.
fn is_external(url: &str) -> bool {
    url.starts_with('/')
        || url.starts_with('#')
        || url.starts_with("data:")
        || url.contains("://")
}

/// The single reference that replaces a block.
pub fn render_reference(kind: AssetKind, reference: &str) -> String {
    match kind {
        AssetKind::Script => format!(r#"<script src="{reference}"></script>"#),
        AssetKind::Style => format!(r#"<link rel="stylesheet" href="{reference}">"#),
    }
}

struct Replacement<'a> {
    range: Range<usize>,
    expected: &'a str,
    line: usize,
    text: String,
}

/// Replace ranges back to front, so earlier offsets stay valid.
///
/// Fails with the line of the first block whose range no longer holds the
/// expected text.
fn apply_replacements(content: &str, replacements: &mut [Replacement]) -> Result<String, usize> {
    replacements.sort_by_key(|r| r.range.start);

    let mut out = content.to_string();
    for replacement in replacements.iter().rev() {
        if content.get(replacement.range.clone()) != Some(replacement.expected) {
            return Err(replacement.line);
        }
        out.replace_range(replacement.range.clone(), &replacement.text);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::blocks::{Flows, parse_blocks};
    use std::fs;

    const PAGE: &str = "<html>\n<head>\n  <!-- build:css css/site.css -->\n  <link rel=\"stylesheet\" href=\"css/a.css\">\n  <!-- endbuild -->\n</head>\n<body>\n  <h1>Title</h1>\n  <!-- build:js js/main.js -->\n  <script src=\"js/a.js\"></script>\n  <script src=\"js/b.js\"></script>\n  <!-- endbuild -->\n  <footer>end</footer>\n</body>\n</html>\n";

    fn flows() -> Flows {
        serde_yaml::from_str("js:\n  steps: [concat, uglify]\ncss:\n  steps: [concat, cssmin]\n").unwrap()
    }

    /// A dist tree holding a copy of the page and both artifacts.
    fn fixture() -> (tempfile::TempDir, BlockPlan) {
        let dir = tempfile::tempdir().unwrap();
        let dist = dir.path().join("build");
        fs::create_dir_all(dist.join("js")).unwrap();
        fs::create_dir_all(dist.join("css")).unwrap();
        fs::write(dist.join("index.html"), PAGE).unwrap();
        fs::write(dist.join("js/main.min.js"), "ab").unwrap();
        fs::write(dist.join("css/site.min.css"), "a{}").unwrap();

        let source = dir.path().join("src/index.html");
        let file = MarkupFile {
            blocks: parse_blocks(&source, PAGE).unwrap(),
            path: source,
            relative: "index.html".to_string(),
        };
        let plan = BlockPlan::new(vec![file], &flows(), dir.path()).unwrap();
        (dir, plan)
    }

    #[test]
    fn test_rewrites_blocks_and_nothing_else() {
        let (dir, plan) = fixture();
        let rewriter = Rewriter::new(dir.path().join("build"), RewriteOptions::default());
        let written = rewriter.rewrite_markup(&plan, &plan.files[0]).unwrap();
        assert_eq!(written, Some(dir.path().join("build/index.html")));

        let out = fs::read_to_string(dir.path().join("build/index.html")).unwrap();
        let css = &plan.files[0].blocks[0];
        let js = &plan.files[0].blocks[1];

        // Bytes outside the recorded ranges are identical
        assert_eq!(&out[..css.range.start], &PAGE[..css.range.start]);
        assert!(out.ends_with(&PAGE[js.range.end..]));
        let css_ref = r#"<link rel="stylesheet" href="css/site.min.css">"#;
        let between = &PAGE[css.range.end..js.range.start];
        assert!(out.contains(&format!("{css_ref}{between}")));

        // Exactly one script reference to the artifact
        assert_eq!(out.matches("<script").count(), 1);
        assert!(out.contains(r#"<script src="js/main.min.js"></script>"#));
        assert!(!out.contains("build:"));
    }

    #[test]
    fn test_flatten_and_cdn() {
        let (dir, plan) = fixture();
        let rewriter = Rewriter::new(
            dir.path().join("build"),
            RewriteOptions {
                cdn: "https://cdn.example.com/app/".to_string(),
                flatten: true,
            },
        );
        rewriter.rewrite_markup(&plan, &plan.files[0]).unwrap();
        let out = fs::read_to_string(dir.path().join("build/index.html")).unwrap();
        assert!(out.contains(r#"<script src="https://cdn.example.com/app/main.min.js"></script>"#));
        assert!(out.contains(r#"href="https://cdn.example.com/app/site.min.css""#));
    }

    #[test]
    fn test_missing_artifact_is_named() {
        let (dir, plan) = fixture();
        fs::remove_file(dir.path().join("build/js/main.min.js")).unwrap();
        let rewriter = Rewriter::new(dir.path().join("build"), RewriteOptions::default());
        let err = rewriter.rewrite_markup(&plan, &plan.files[0]).unwrap_err();
        match err {
            RewriteError::MissingArtifact { path, output, .. } => {
                assert_eq!(path, dir.path().join("build/js/main.min.js"));
                assert_eq!(output, "js/main.js");
            }
            other => panic!("unexpected error: {other}"),
        }
        // Nothing was written
        assert_eq!(fs::read_to_string(dir.path().join("build/index.html")).unwrap(), PAGE);
    }

    #[test]
    fn test_changed_markup_is_stale() {
        let (dir, plan) = fixture();
        let edited = PAGE.replace("<h1>Title</h1>", "<h1>A much longer title</h1>");
        fs::write(dir.path().join("build/index.html"), edited).unwrap();
        let rewriter = Rewriter::new(dir.path().join("build"), RewriteOptions::default());
        let err = rewriter.rewrite_markup(&plan, &plan.files[0]).unwrap_err();
        assert!(matches!(err, RewriteError::StaleMarkup { line: 9, .. }));
    }

    #[test]
    fn test_css_urls() {
        let rewriter = Rewriter::new(
            PathBuf::from("build"),
            RewriteOptions {
                cdn: String::new(),
                flatten: true,
            },
        );
        let css = "a{background:url('../img/icons/star.png')}\
                   b{background:url(./fonts/x.woff)}\
                   c{background:url(data:image/png;base64,AAA)}\
                   d{background:url(\"https://example.com/x.png\")}\
                   e{background:url(/abs/y.png)}";
        assert_eq!(
            rewriter.rewrite_css(css),
            "a{background:url('star.png')}\
             b{background:url(x.woff)}\
             c{background:url(data:image/png;base64,AAA)}\
             d{background:url(\"https://example.com/x.png\")}\
             e{background:url(/abs/y.png)}"
        );
    }

    #[test]
    fn test_css_cdn_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.css");
        fs::write(&path, "a{background:url(../img/a.png)}").unwrap();
        let rewriter = Rewriter::new(
            dir.path().to_path_buf(),
            RewriteOptions {
                cdn: "//cdn.example.com".to_string(),
                flatten: false,
            },
        );
        assert!(rewriter.rewrite_stylesheet(&path).unwrap());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "a{background:url(//cdn.example.com/img/a.png)}"
        );
    }

    #[test]
    fn test_css_untouched_without_options() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.css");
        fs::write(&path, "a{background:url(../img/a.png)}").unwrap();
        let rewriter = Rewriter::new(dir.path().to_path_buf(), RewriteOptions::default());
        assert!(!rewriter.rewrite_stylesheet(&path).unwrap());
    }
}
