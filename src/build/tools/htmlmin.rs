//! Markup minification with `minify-html`.

use serde::Deserialize;

use super::{Tool, ToolError, ToolOutput, ensure_parent};
use crate::build::pipeline::PipelineContext;
use crate::build::registry::{ResolvedStage, TaskRegistry};

#[derive(Debug, Deserialize)]
#[serde(default)]
struct HtmlMinOptions {
    keep_comments: bool,
    keep_closing_tags: bool,
    keep_html_and_head_opening_tags: bool,
    minify_css: bool,
    minify_js: bool,
}

impl Default for HtmlMinOptions {
    fn default() -> Self {
        Self {
            keep_comments: false,
            keep_closing_tags: true,
            keep_html_and_head_opening_tags: true,
            minify_css: true,
            minify_js: true,
        }
    }
}

impl HtmlMinOptions {
    fn cfg(&self) -> minify_html::Cfg {
        let mut cfg = minify_html::Cfg::new();
        cfg.keep_comments = self.keep_comments;
        cfg.keep_closing_tags = self.keep_closing_tags;
        cfg.keep_html_and_head_opening_tags = self.keep_html_and_head_opening_tags;
        cfg.minify_css = self.minify_css;
        cfg.minify_js = self.minify_js;
        cfg
    }
}

pub struct HtmlMinTool;

impl Tool for HtmlMinTool {
    fn name(&self) -> &'static str {
        "htmlmin"
    }

    fn validate(&self, stage: &ResolvedStage, _registry: &TaskRegistry) -> Result<(), ToolError> {
        stage.options::<HtmlMinOptions>().map(|_| ())
    }

    fn run(&self, stage: &ResolvedStage, ctx: &mut PipelineContext) -> Result<ToolOutput, ToolError> {
        let cfg = stage.options::<HtmlMinOptions>()?.cfg();
        let mut written = Vec::new();

        for mapping in ctx.expand_files(stage)? {
            for src in &mapping.src {
                let dest = match (&mapping.dest, mapping.src.len()) {
                    (Some(dest), 1) => dest.clone(),
                    (Some(dest), _) => dest.join(src.file_name().unwrap_or_default()),
                    (None, _) => src.clone(),
                };

                let html = std::fs::read(src).map_err(ToolError::io(src))?;
                let minified = minify_html::minify(&html, &cfg);

                ensure_parent(&dest)?;
                std::fs::write(&dest, minified).map_err(ToolError::io(&dest))?;
                written.push(dest);
            }
        }

        Ok(ToolOutput::new(written))
    }
}
