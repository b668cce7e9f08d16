// Library interface for hoard
// Scripts embed the caches through these modules; the `hoard` binary is a
// thin maintenance CLI over the same code.

pub mod blob;
pub mod cli;
pub mod cli_utils;
pub mod commands;
pub mod config;
pub mod config_discovery;
pub mod error;
pub mod hasher;
pub mod index;
pub mod logging;
pub mod registry;
pub mod storage;

// Re-export commonly used types
pub use blob::{BlobStore, CachedBlob, ImageSource};
pub use config::HoardConfig;
pub use config_discovery::discover_config;
pub use error::{CacheError, Result};
pub use hasher::{Digest, HashOptions};
pub use index::{Cache, CacheEvent, CacheStats, Lookup};
pub use registry::CacheRegistry;
pub use storage::{BackendKind, CacheBackend, CacheEntry, CacheValue};
