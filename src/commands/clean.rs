use std::path::{Path, PathBuf};

use super::Project;
use crate::{CleanArgs, build::resolve};

/// Path variables naming the directories this command deletes.
const CLEANED: [&str; 2] = ["dist", "temp"];

pub async fn run(args: &CleanArgs) -> Result<(), anyhow::Error> {
    let project = Project::load(args.config_file.as_deref()).await?;

    for variable in CLEANED {
        let Some(dir) = project.config.paths.get(variable) else {
            continue;
        };
        let path = checked_target(&project.base_path, dir)?;
        if !path.exists() {
            continue;
        }

        if args.dry_run {
            println!("Would delete {}", path.display());
        } else {
            tokio::fs::remove_dir_all(&path).await?;
            println!("Deleted {}", path.display());
        }
    }

    Ok(())
}

/// Resolve a directory to delete, refusing the project itself and anything outside it.
fn checked_target(base_path: &Path, dir: &str) -> Result<PathBuf, anyhow::Error> {
    let path = resolve(base_path, dir);
    let inside = path
        .components()
        .all(|c| !matches!(c, std::path::Component::ParentDir))
        && path.starts_with(base_path)
        && path != base_path;

    if dir.trim().is_empty() || !inside {
        return Err(anyhow::anyhow!(
            "Refusing to delete '{dir}': not a directory inside {}",
            base_path.display()
        ));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_target() {
        let base = Path::new("/work/site");
        assert_eq!(checked_target(base, "build").unwrap(), base.join("build"));
        assert_eq!(checked_target(base, ".tmp").unwrap(), base.join(".tmp"));
        assert!(checked_target(base, "").is_err());
        assert!(checked_target(base, ".").is_err());
        assert!(checked_target(base, "../other").is_err());
        assert!(checked_target(base, "/etc").is_err());
    }
}
