use clap::{Parser, Subcommand};

use crate::storage::BackendKind;

/// hoard - content-addressed caches for LLM scripts
///
/// Inspect, seed and clear the named caches a script runtime keeps on disk,
/// and store generated artifacts under the hash of their content.
#[derive(Parser, Debug)]
#[command(name = "hoard")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Content-addressed caches for LLM scripts", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonConfigArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Configuration arguments shared by every command
#[derive(Parser, Debug, Clone, Default)]
pub struct CommonConfigArgs {
    /// Config file path
    #[arg(short = 'c', long, env = "HOARD_CONFIG", global = true)]
    pub config: Option<String>,

    /// Cache root directory
    #[arg(long, env = "HOARD_CONFIG_CACHE_DIR", global = true)]
    pub config_cache_dir: Option<String>,

    /// Backend used when a command does not pass --backend
    #[arg(long, env = "HOARD_CONFIG_BACKEND", global = true)]
    pub config_backend: Option<BackendKind>,
}

/// How a cache is addressed on the command line
#[derive(Parser, Debug, Clone)]
pub struct CacheTarget {
    /// Cache name
    pub name: String,

    /// Storage backend (memory, jsonl, directory)
    #[arg(short, long)]
    pub backend: Option<BackendKind>,
}

/// How a key is read from the command line
#[derive(Parser, Debug, Clone)]
pub struct KeyArgs {
    /// Cache key
    pub key: String,

    /// Parse the key as JSON instead of using it as a plain string
    #[arg(long)]
    pub json_key: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the cached value for a key
    Get {
        #[command(flatten)]
        target: CacheTarget,

        #[command(flatten)]
        key: KeyArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Store a value (parsed as JSON, or kept as a string)
    Set {
        #[command(flatten)]
        target: CacheTarget,

        #[command(flatten)]
        key: KeyArgs,

        /// Value to store
        value: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove the entry for a key
    Delete {
        #[command(flatten)]
        target: CacheTarget,

        #[command(flatten)]
        key: KeyArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the entries of a cache
    List {
        #[command(flatten)]
        target: CacheTarget,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the digest a key is stored under
    Sha {
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Delete cache data on disk (one cache, or everything)
    Clear {
        /// Cache name (omit to clear every cache)
        name: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Store a file under the hash of its content
    Blob {
        /// File to store
        file: String,

        /// Destination directory (defaults to <cache root>/.blobs)
        #[arg(short, long)]
        dir: Option<String>,

        /// File extension (sniffed from the content when omitted)
        #[arg(long)]
        ext: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management utilities
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to config file
        path: String,
    },

    /// Print an example configuration
    Example,

    /// Show the effective configuration
    Show,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get_with_backend() {
        let cli = Cli::try_parse_from(["hoard", "get", "docs", "k", "--backend", "dir"]).unwrap();
        match cli.command {
            Commands::Get { target, key, json } => {
                assert_eq!(target.name, "docs");
                assert_eq!(target.backend, Some(BackendKind::Directory));
                assert_eq!(key.key, "k");
                assert!(!key.json_key);
                assert!(!json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_cache_dir_after_subcommand() {
        let cli =
            Cli::try_parse_from(["hoard", "clear", "--config-cache-dir", "/tmp/c"]).unwrap();
        assert_eq!(cli.common.config_cache_dir.as_deref(), Some("/tmp/c"));
        assert!(matches!(cli.command, Commands::Clear { name: None, .. }));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(Cli::try_parse_from(["hoard", "list", "docs", "--backend", "rocksdb"]).is_err());
    }
}
