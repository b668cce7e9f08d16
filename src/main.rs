use anyhow::Result;
use clap::Parser;

use hoard::cli::{Cli, Commands};
use hoard::commands::{self, Workspace};
use hoard::logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging
    logging::init();

    // Parse CLI arguments
    let cli = Cli::parse();
    let common = cli.common;
    let workspace = || Workspace::load(&common);

    // Dispatch to appropriate command handler
    match cli.command {
        Commands::Get { target, key, json } => {
            commands::cache::get(&workspace()?, &target, &key, json).await
        }
        Commands::Set {
            target,
            key,
            value,
            json,
        } => commands::cache::set(&workspace()?, &target, &key, &value, json).await,
        Commands::Delete { target, key, json } => {
            commands::cache::delete(&workspace()?, &target, &key, json).await
        }
        Commands::List { target, json } => {
            commands::cache::list(&workspace()?, &target, json).await
        }
        Commands::Sha { key } => commands::cache::sha(&workspace()?, &key),
        Commands::Clear { name, json } => {
            commands::cache::clear(&workspace()?, name.as_deref(), json).await
        }
        Commands::Blob {
            file,
            dir,
            ext,
            json,
        } => {
            commands::blob::run(&workspace()?, &file, dir.as_deref(), ext.as_deref(), json).await
        }
        // Config commands must work even when the discovered config is broken
        Commands::Config(args) => commands::config::run(&common, args.command),
    }
}
