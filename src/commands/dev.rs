use std::sync::Arc;

use tokio::sync::broadcast;

use super::{Project, run_pipeline};
use crate::{DevArgs, build::Builder, build::watch, server};

/// Name of the pipeline this command runs.
const PIPELINE: &str = "dev";

pub async fn run(args: &DevArgs) -> Result<(), anyhow::Error> {
    let project = Project::load(args.config_file.as_deref()).await?;
    let pipeline = project
        .config
        .pipelines
        .get(PIPELINE)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("No '{PIPELINE}' pipeline in config"))?;

    let serve = match (&pipeline.serve, args.no_serve) {
        (Some(profile), false) => Some(project.serve_options(profile)?),
        _ => None,
    };
    let watch_config = project.config.watch.clone();

    let builder = Arc::new(Builder::new(project.config, project.base_path));
    run_pipeline(Arc::clone(&builder), PIPELINE).await?;

    // Create broadcast channel for live reload
    let (reload_tx, _) = broadcast::channel::<()>(16);

    let watcher = if pipeline.watch {
        let reload = watch_config.live_reload.then(|| reload_tx.clone());
        let builder = Arc::clone(&builder);
        println!("Watching for changes...");
        Some(tokio::spawn(async move {
            if let Err(e) = watch(builder, &watch_config, reload).await {
                tracing::error!("file watcher stopped: {e}");
            }
        }))
    } else {
        None
    };

    match (serve, watcher) {
        (Some(options), _) => server::serve(&options, reload_tx).await?,
        (None, Some(watcher)) => watcher.await?,
        (None, None) => {}
    }

    Ok(())
}
