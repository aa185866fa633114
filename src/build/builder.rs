use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ProjectConfig;

use super::pipeline::{Pipeline, PipelineContext, PipelineError, StageReport};
use super::registry::TaskRegistry;
use super::tools::ToolRegistry;

#[derive(Debug)]
pub struct BuildResult {
    pub pipeline: String,
    pub stages: Vec<StageReport>,
    pub elapsed: Duration,
}

impl BuildResult {
    /// Total number of files the stages wrote.
    pub fn files(&self) -> usize {
        self.stages.iter().map(|s| s.files.len()).sum()
    }
}

/// Runs pipelines for one project.
///
/// Every run starts from a fresh registry built from the config, so targets a
/// previous run synthesized never leak into the next.
pub struct Builder {
    config: ProjectConfig,
    /// Base path for resolving relative paths (the config file's directory)
    base_path: PathBuf,
    tools: ToolRegistry,
}

impl Builder {
    pub fn new(config: ProjectConfig, base_path: PathBuf) -> Self {
        Self::with_tools(config, base_path, ToolRegistry::with_builtins())
    }

    pub fn with_tools(config: ProjectConfig, base_path: PathBuf, tools: ToolRegistry) -> Self {
        Self {
            config,
            base_path,
            tools,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Run a pipeline declared in the config.
    pub fn run_pipeline(&self, name: &str) -> Result<BuildResult, PipelineError> {
        let declared = self
            .config
            .pipelines
            .get(name)
            .ok_or_else(|| PipelineError::UnknownPipeline {
                name: name.to_string(),
                declared: self.config.pipelines.keys().collect::<Vec<_>>().join(", "),
            })?;

        let pipeline = Pipeline::plan(name, &declared.stages)?;
        self.execute(&pipeline)
    }

    /// Run a list of stage references as given, e.g. for a watch rule.
    pub fn run_stages(&self, label: &str, references: &[String]) -> Result<BuildResult, PipelineError> {
        let pipeline = Pipeline::from_references(label, references)?;
        self.execute(&pipeline)
    }

    fn execute(&self, pipeline: &Pipeline) -> Result<BuildResult, PipelineError> {
        let registry = TaskRegistry::from_config(&self.config)?;
        pipeline.validate(&registry, &self.tools)?;

        let start = Instant::now();
        let mut ctx = PipelineContext::new(self.base_path.clone(), Arc::new(registry));
        let stages = pipeline.run(&self.tools, &mut ctx)?;

        Ok(BuildResult {
            pipeline: pipeline.name().to_string(),
            stages,
            elapsed: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const PROJECT: &str = r#"
paths:
  app: src
  dist: dist
  temp: .tmp

tasks:
  clean:
    targets:
      build:
        files:
          - src: ["{{ temp }}", "{{ dist }}"]
            dot: true
  useminPrepare:
    tool: usemin-prepare
    options:
      dest: "{{ dist }}"
      staging: "{{ temp }}"
      flow:
        js:
          steps: [concat, minify]
    targets:
      html:
        files:
          - cwd: "{{ app }}"
            src: "*.html"
  concat: {}
  minify:
    tool: concat
  copy:
    targets:
      build:
        files:
          - expand: true
            cwd: "{{ app }}"
            src: "*.html"
            dest: "{{ dist }}"
  usemin:
    options:
      root: "{{ dist }}"

pipelines:
  build:
    stages:
      - clean:build
      - { run: useminPrepare, produces: [blocks] }
      - { run: usemin, consumes: [blocks, markup, minified] }
      - { run: concat, consumes: [blocks], produces: [joined] }
      - { run: minify, consumes: [joined], produces: [minified] }
      - { run: "copy:build", produces: [markup] }
"#;

    const PAGE: &str = "<html>\n<body>\n<!-- build:js main.js -->\n<script src=\"js/a.js\"></script>\n<script src=\"js/b.js\"></script>\n<!-- endbuild -->\n</body>\n</html>\n";

    fn project() -> (tempfile::TempDir, Builder) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/js")).unwrap();
        fs::write(root.join("src/js/a.js"), "var a = 1;").unwrap();
        fs::write(root.join("src/js/b.js"), "var b = 2;").unwrap();
        fs::write(root.join("src/index.html"), PAGE).unwrap();

        let config = ProjectConfig::from_yaml_str(PROJECT).unwrap();
        let builder = Builder::new(config, root.to_path_buf());
        (dir, builder)
    }

    #[test]
    fn test_build_produces_minified_bundle_and_rewrites_markup() {
        let (dir, builder) = project();
        let root = dir.path();

        let result = builder.run_pipeline("build").unwrap();
        let stages: Vec<_> = result.stages.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(
            stages,
            vec![
                "clean:build",
                "useminPrepare:html",
                "concat:js/main.js",
                "minify:js/main.js",
                "copy:build",
                "usemin",
            ]
        );

        assert_eq!(
            fs::read_to_string(root.join("dist/js/main.min.js")).unwrap(),
            "var a = 1;\nvar b = 2;"
        );

        let markup = fs::read_to_string(root.join("dist/index.html")).unwrap();
        assert_eq!(markup.matches("<script").count(), 1);
        assert!(markup.contains(r#"<script src="js/main.min.js"></script>"#));
        assert!(!markup.contains("build:js"));

        // Sources are untouched
        assert_eq!(fs::read_to_string(root.join("src/index.html")).unwrap(), PAGE);
    }

    #[test]
    fn test_second_build_is_byte_identical() {
        let (dir, builder) = project();
        let root = dir.path();

        builder.run_pipeline("build").unwrap();
        let markup = fs::read(root.join("dist/index.html")).unwrap();
        let bundle = fs::read(root.join("dist/js/main.min.js")).unwrap();

        builder.run_pipeline("build").unwrap();
        assert_eq!(fs::read(root.join("dist/index.html")).unwrap(), markup);
        assert_eq!(fs::read(root.join("dist/js/main.min.js")).unwrap(), bundle);
    }

    #[test]
    fn test_missing_source_aborts_before_rewrite() {
        let (dir, builder) = project();
        let root = dir.path();
        fs::remove_file(root.join("src/js/b.js")).unwrap();

        let err = builder.run_pipeline("build").unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("stage 'concat:js/main.js' failed"), "{message}");
        assert!(message.contains("b.js"), "{message}");
        assert!(!root.join("dist/index.html").exists());
    }

    #[test]
    fn test_shared_output_keeps_sources_repeated_across_pages() {
        let (dir, builder) = project();
        let root = dir.path();
        fs::write(root.join("src/js/c.js"), "var c = 3;").unwrap();
        fs::write(
            root.join("src/two.html"),
            "<!-- build:js main.js -->\n<script src=\"js/c.js\"></script>\n<script src=\"js/a.js\"></script>\n<!-- endbuild -->\n",
        )
        .unwrap();

        builder.run_pipeline("build").unwrap();
        assert_eq!(
            fs::read_to_string(root.join("dist/js/main.min.js")).unwrap(),
            "var a = 1;\nvar b = 2;\nvar c = 3;\nvar a = 1;"
        );
    }

    #[test]
    fn test_block_sources_are_not_glob_patterns() {
        let (dir, builder) = project();
        let root = dir.path();
        fs::write(root.join("src/js/lib[1].js"), "var lib = 0;").unwrap();
        fs::write(
            root.join("src/index.html"),
            "<!-- build:js main.js -->\n<script src=\"js/lib[1].js\"></script>\n<!-- endbuild -->\n",
        )
        .unwrap();

        builder.run_pipeline("build").unwrap();
        assert_eq!(
            fs::read_to_string(root.join("dist/js/main.min.js")).unwrap(),
            "var lib = 0;"
        );
    }

    #[test]
    fn test_missing_bracketed_source_fails() {
        let (dir, builder) = project();
        let root = dir.path();
        fs::write(
            root.join("src/index.html"),
            "<!-- build:js main.js -->\n<script src=\"js/lib[1].js\"></script>\n<!-- endbuild -->\n",
        )
        .unwrap();

        let err = builder.run_pipeline("build").unwrap_err();
        assert!(err.to_string().contains("lib[1].js"), "{err}");
    }

    #[test]
    fn test_misconfigured_stage_stops_before_anything_runs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("dist")).unwrap();

        let yaml = r#"
tasks:
  clean:
    targets:
      build:
        files:
          - src: dist
  copy:
    targets:
      build:
        files:
          - src: "src/*.html"
pipelines:
  build:
    stages: [clean:build, copy:build]
"#;
        let builder = Builder::new(ProjectConfig::from_yaml_str(yaml).unwrap(), root.to_path_buf());
        let err = builder.run_pipeline("build").unwrap_err();

        assert!(matches!(err, PipelineError::InvalidStage { .. }));
        // clean never ran
        assert!(root.join("dist").exists());
    }

    #[test]
    fn test_unknown_pipeline() {
        let (_dir, builder) = project();
        let err = builder.run_pipeline("deploy").unwrap_err();
        assert_eq!(err.to_string(), "unknown pipeline 'deploy' (declared: build)");
    }

    #[test]
    fn test_run_stages_in_given_order() {
        let (dir, builder) = project();
        fs::create_dir_all(dir.path().join("dist")).unwrap();

        let result = builder
            .run_stages("watch:html", &["copy:build".to_string(), "clean:build".to_string()])
            .unwrap();
        assert_eq!(result.pipeline, "watch:html");
        assert_eq!(result.stages[0].stage, "copy:build");
        assert!(!dir.path().join("dist").exists());
    }
}
