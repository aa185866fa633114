use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod build;
mod commands;
mod config;
mod server;
mod util;

/// Environment variable that overrides the log filter.
const LOG_ENV: &str = "ASSETFLOW_LOG";

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// The command to execute (defaults to `dev`)
    #[command(subcommand)]
    command: Option<AssetflowCommand>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser)]
struct InitArgs {
    /// The path to initialize the project in
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Whether to create the directory if it doesn't exist
    #[arg(short, long, default_value = "false")]
    create: bool,

    /// Overwrite an existing config file
    #[arg(short, long, default_value = "false")]
    force: bool,
}

#[derive(Parser, Default)]
struct DevArgs {
    /// The path to the configuration file (default: assetflow.yaml)
    #[arg(short, long)]
    config_file: Option<PathBuf>,

    /// Run the pipeline without starting the server
    #[arg(long, default_value = "false")]
    no_serve: bool,
}

#[derive(Parser)]
struct BuildArgs {
    /// The path to the configuration file (default: assetflow.yaml)
    #[arg(short, long)]
    config_file: Option<PathBuf>,

    /// Skip serving the build output afterwards
    #[arg(long, default_value = "false")]
    no_serve: bool,
}

#[derive(Parser)]
struct CleanArgs {
    /// The path to the configuration file (default: assetflow.yaml)
    #[arg(short, long)]
    config_file: Option<PathBuf>,

    /// Only print what would be deleted
    #[arg(short, long, default_value = "false")]
    dry_run: bool,
}

#[derive(Subcommand)]
enum AssetflowCommand {
    /// Run the dev pipeline, then serve the sources and watch for changes
    Dev(DevArgs),

    /// Run the build pipeline, then serve the distribution
    Build(BuildArgs),

    /// Delete the distribution and temporary directories
    Clean(CleanArgs),

    /// Write a starter assetflow.yaml
    Init(InitArgs),
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    let default_filter = if args.verbose { "assetflow=debug" } else { "assetflow=info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set logging subscriber")?;

    match args.command.unwrap_or_else(|| AssetflowCommand::Dev(DevArgs::default())) {
        AssetflowCommand::Dev(args) => {
            commands::dev::run(&args).await?;
        }
        AssetflowCommand::Build(args) => {
            commands::build::run(&args).await?;
        }
        AssetflowCommand::Clean(args) => {
            commands::clean::run(&args).await?;
        }
        AssetflowCommand::Init(args) => {
            commands::init::run(&args).await?;
        }
    }

    Ok(())
}
