//! Copy tool.

use std::path::{Path, PathBuf};

use super::{Tool, ToolError, ToolOutput, ensure_parent};
use crate::build::pipeline::PipelineContext;
use crate::build::registry::{ResolvedStage, TaskRegistry};

pub struct CopyTool;

impl Tool for CopyTool {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn validate(&self, stage: &ResolvedStage, _registry: &TaskRegistry) -> Result<(), ToolError> {
        match stage.files.iter().find(|spec| spec.dest.is_none()) {
            Some(spec) => Err(ToolError::InvalidOptions(format!(
                "copy needs a 'dest' for {}",
                spec.src.join(", ")
            ))),
            None => Ok(()),
        }
    }

    fn run(&self, stage: &ResolvedStage, ctx: &mut PipelineContext) -> Result<ToolOutput, ToolError> {
        let mut written = Vec::new();

        for spec in &stage.files {
            let dest_is_dir = spec.dest.as_deref().is_some_and(|d| d.ends_with('/'));
            for mapping in crate::build::files::expand(spec, &ctx.base_path)? {
                let Some(dest) = &mapping.dest else {
                    continue;
                };

                // Several sources, or a trailing slash, mean `dest` is a directory
                let into_dir = !spec.expand && (dest_is_dir || mapping.src.len() > 1);
                for src in &mapping.src {
                    let target = if into_dir {
                        dest.join(src.file_name().unwrap_or_default())
                    } else {
                        dest.clone()
                    };
                    if let Some(path) = copy_one(src, &target)? {
                        written.push(path);
                    }
                }
            }
        }

        tracing::debug!(files = written.len(), stage = %stage.label(), "copied");
        Ok(ToolOutput::new(written))
    }
}

fn copy_one(src: &Path, dest: &Path) -> Result<Option<PathBuf>, ToolError> {
    if src.is_dir() {
        std::fs::create_dir_all(dest).map_err(ToolError::io(dest))?;
        return Ok(None);
    }
    if !src.exists() {
        return Err(ToolError::MissingInput(src.to_path_buf()));
    }

    ensure_parent(dest)?;
    std::fs::copy(src, dest).map_err(ToolError::io(src))?;
    Ok(Some(dest.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::pipeline::tests::{context, stage};
    use std::fs;

    #[test]
    fn test_expanded_copy_keeps_structure() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/img/icons")).unwrap();
        fs::write(root.join("src/index.html"), "<p>hi</p>").unwrap();
        fs::write(root.join("src/img/icons/star.png"), "png").unwrap();
        fs::write(root.join("src/notes.txt"), "skip").unwrap();

        let stage = stage(
            "copy",
            "copy",
            serde_json::json!({}),
            "- expand: true\n  cwd: src\n  src: ['*.html', 'img/**/*.png']\n  dest: build\n",
        );
        let output = CopyTool.run(&stage, &mut context(root)).unwrap();

        assert_eq!(
            output.files,
            vec![root.join("build/index.html"), root.join("build/img/icons/star.png")]
        );
        assert_eq!(fs::read_to_string(root.join("build/index.html")).unwrap(), "<p>hi</p>");
        assert!(!root.join("build/notes.txt").exists());
    }

    #[test]
    fn test_many_sources_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/a.css"), "a").unwrap();
        fs::write(root.join("src/b.css"), "b").unwrap();

        let stage = stage("copy", "copy", serde_json::json!({}), "- src: 'src/*.css'\n  dest: out\n");
        let output = CopyTool.run(&stage, &mut context(root)).unwrap();
        assert_eq!(output.files, vec![root.join("out/a.css"), root.join("out/b.css")]);
    }

    #[test]
    fn test_missing_literal_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let stage = stage("copy", "copy", serde_json::json!({}), "- src: 'nope.txt'\n  dest: out.txt\n");
        let err = CopyTool.run(&stage, &mut context(dir.path())).unwrap_err();
        assert!(matches!(err, ToolError::MissingInput(_)));
    }

    #[test]
    fn test_validate_requires_dest() {
        let stage = stage("copy", "copy", serde_json::json!({}), "- src: 'a.txt'\n");
        assert!(CopyTool.validate(&stage, &TaskRegistry::default()).is_err());
    }
}
