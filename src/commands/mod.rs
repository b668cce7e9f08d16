pub mod blob;
pub mod cache;
pub mod config;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::cli::CommonConfigArgs;
use crate::config::HoardConfig;
use crate::config_discovery::{load_config_with_discovery, LoadedConfig};
use crate::registry::CacheRegistry;

/// Effective configuration for one CLI invocation
pub struct Workspace {
    pub loaded: LoadedConfig,
    /// Cache root after command line overrides
    pub cache_root: PathBuf,
}

impl Workspace {
    /// Discover the config file and apply `--config-*` overrides on top
    pub fn load(common: &CommonConfigArgs) -> Result<Self> {
        let mut loaded = load_config_with_discovery(common.config.as_deref().map(Path::new))?;

        if let Some(backend) = common.config_backend {
            loaded.config.cache.default_backend = backend;
        }

        let cache_root = match &common.config_cache_dir {
            Some(dir) => {
                let dir = PathBuf::from(dir);
                if dir.is_absolute() {
                    dir
                } else {
                    std::env::current_dir()
                        .context("Failed to get current directory")?
                        .join(dir)
                }
            }
            None => loaded.cache_root(),
        };

        debug!(
            config = ?loaded.path,
            cache_root = %cache_root.display(),
            "workspace loaded"
        );

        Ok(Self { loaded, cache_root })
    }

    pub fn config(&self) -> &HoardConfig {
        &self.loaded.config
    }

    pub fn registry(&self) -> CacheRegistry {
        CacheRegistry::new(&self.cache_root, self.config().hash_options())
    }
}
