mod blocks;
mod builder;
mod files;
mod paths;
pub mod pipeline;
mod registry;
mod rewrite;
pub mod tools;
mod watch;

pub use builder::{BuildResult, Builder};
pub use paths::{base_path_from_config, resolve};
pub use watch::watch;
