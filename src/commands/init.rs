use crate::{
    InitArgs,
    config::{DEFAULT_CONFIG, DEFAULT_CONFIG_FILE},
};

pub async fn run(args: &InitArgs) -> Result<(), anyhow::Error> {
    let path = if args.path.is_relative() {
        std::env::current_dir()?.join(&args.path)
    } else {
        args.path.clone()
    };

    if !path.exists() {
        if args.create {
            tokio::fs::create_dir_all(&path).await?;
            println!("Created directory {path}", path = path.display());
        } else {
            return Err(anyhow::anyhow!(
                "Directory does not exist: {path}",
                path = path.display()
            ));
        }
    }

    let config_file = path.join(DEFAULT_CONFIG_FILE);
    if config_file.exists() && !args.force {
        return Err(anyhow::anyhow!(
            "{config_file} already exists (use --force to overwrite)",
            config_file = config_file.display()
        ));
    }

    println!("Initializing project in {}", path.display());
    tokio::fs::write(&config_file, DEFAULT_CONFIG).await?;

    println!(
        "Created config file {config_file}",
        config_file = config_file.display()
    );

    Ok(())
}
