use anyhow::Result;
use tracing::info;

use super::Workspace;
use crate::cli::{CommonConfigArgs, ConfigCommands};
use crate::config::HoardConfig;

pub fn run(common: &CommonConfigArgs, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Validate { path } => validate(&path),
        ConfigCommands::Example => example(),
        ConfigCommands::Show => show(&Workspace::load(common)?),
    }
}

fn validate(path: &str) -> Result<()> {
    info!("Validating config file: {}", path);

    let config = HoardConfig::from_file(path)?;
    config.validate()?;

    println!("✓ Configuration file is valid: {}", path);
    println!("\nSummary:");
    println!("  - Cache directory: {}", config.cache.dir);
    println!("  - Format version: {}", config.cache.format_version);
    println!("  - Key digest length: {}", config.cache.sha_length);
    println!("  - Blob digest length: {}", config.cache.blob_hash_length);
    println!("  - Default backend: {}", config.cache.default_backend);

    Ok(())
}

fn example() -> Result<()> {
    println!("{}", HoardConfig::example()?);
    Ok(())
}

fn show(workspace: &Workspace) -> Result<()> {
    match &workspace.loaded.path {
        Some(path) => println!("# Loaded from {}", path.display()),
        None => println!("# No configuration file found, using defaults"),
    }
    println!("# Cache root: {}\n", workspace.cache_root.display());
    println!("{}", toml::to_string_pretty(workspace.config())?);

    Ok(())
}
