use std::sync::Arc;

use tokio::sync::broadcast;

use super::{Project, run_pipeline};
use crate::{BuildArgs, build::Builder, server};

/// Name of the pipeline this command runs.
const PIPELINE: &str = "build";

pub async fn run(args: &BuildArgs) -> Result<(), anyhow::Error> {
    let project = Project::load(args.config_file.as_deref()).await?;
    let profile = project
        .config
        .pipelines
        .get(PIPELINE)
        .ok_or_else(|| anyhow::anyhow!("No '{PIPELINE}' pipeline in config"))?
        .serve
        .clone();

    let serve = match (profile, args.no_serve) {
        (Some(profile), false) => Some(project.serve_options(&profile)?),
        _ => None,
    };

    let builder = Arc::new(Builder::new(project.config, project.base_path));
    run_pipeline(builder, PIPELINE).await?;

    if let Some(mut options) = serve {
        // Nothing rebuilds the distribution, so there is nothing to reload
        options.live_reload = false;
        let (reload_tx, _) = broadcast::channel::<()>(1);
        server::serve(&options, reload_tx).await?;
    }

    Ok(())
}
