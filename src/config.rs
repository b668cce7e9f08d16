use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::blob::BlobStore;
use crate::hasher::{
    HashOptions, DEFAULT_BLOB_HASH_LENGTH, DEFAULT_FORMAT_VERSION, DEFAULT_SHA_LENGTH,
};
use crate::registry::CacheRegistry;
use crate::storage::BackendKind;

/// Longest digest a SHA256 hex string can provide
const MAX_HASH_LENGTH: usize = 64;

/// Complete hoard configuration (loaded from TOML file)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HoardConfig {
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Cache root, relative paths resolve against the config file's folder
    #[serde(default = "default_cache_dir")]
    pub dir: String,

    /// Salt mixed into every key digest. Changing it orphans existing entries.
    #[serde(default = "default_format_version")]
    pub format_version: String,

    /// Hex characters kept from key digests (1-64)
    #[serde(default = "default_sha_length")]
    pub sha_length: usize,

    /// Hex characters kept from blob content digests (1-64)
    #[serde(default = "default_blob_hash_length")]
    pub blob_hash_length: usize,

    /// Backend used when a command does not name one
    #[serde(default = "default_backend")]
    pub default_backend: BackendKind,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            format_version: default_format_version(),
            sha_length: default_sha_length(),
            blob_hash_length: default_blob_hash_length(),
            default_backend: default_backend(),
        }
    }
}

fn default_cache_dir() -> String {
    ".hoard/cache".to_string()
}

fn default_format_version() -> String {
    DEFAULT_FORMAT_VERSION.to_string()
}

fn default_sha_length() -> usize {
    DEFAULT_SHA_LENGTH
}

fn default_blob_hash_length() -> usize {
    DEFAULT_BLOB_HASH_LENGTH
}

fn default_backend() -> BackendKind {
    BackendKind::Jsonl
}

impl HoardConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: HoardConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Generate example configuration as TOML string
    pub fn example() -> Result<String> {
        toml::to_string_pretty(&HoardConfig::default())
            .context("Failed to render example configuration")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache.dir.trim().is_empty() {
            anyhow::bail!("cache.dir must be set");
        }

        if !(1..=MAX_HASH_LENGTH).contains(&self.cache.sha_length) {
            anyhow::bail!(
                "cache.sha_length must be between 1 and {}",
                MAX_HASH_LENGTH
            );
        }

        if !(1..=MAX_HASH_LENGTH).contains(&self.cache.blob_hash_length) {
            anyhow::bail!(
                "cache.blob_hash_length must be between 1 and {}",
                MAX_HASH_LENGTH
            );
        }

        Ok(())
    }

    /// Absolute cache root, resolving a relative `cache.dir` against `base`
    pub fn cache_root(&self, base: &Path) -> PathBuf {
        let dir = Path::new(&self.cache.dir);
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            base.join(dir)
        }
    }

    pub fn hash_options(&self) -> HashOptions {
        HashOptions {
            salt: self.cache.format_version.clone(),
            length: self.cache.sha_length,
        }
    }

    /// Build the cache registry described by this configuration
    pub fn registry(&self, base: &Path) -> CacheRegistry {
        CacheRegistry::new(self.cache_root(base), self.hash_options())
    }

    pub fn blob_store(&self) -> BlobStore {
        BlobStore::new(self.cache.blob_hash_length)
    }
}
