pub mod directory;
pub mod jsonl;
pub mod memory;

pub use directory::DirectoryStore;
pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::hasher::Digest;

/// Values that can live in a cache
pub trait CacheValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// A cached value together with its address
///
/// `key` is the logical key as JSON; it is kept by the index-backed stores
/// so a cache can enumerate what it holds, and dropped by the per-entry
/// store which only knows digests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub sha: Digest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Value>,
    pub val: V,
}

/// Persistence strategy behind a cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process only, nothing is written to disk
    Memory,
    /// One append-only NDJSON log per cache
    Jsonl,
    /// One JSON file per entry
    #[serde(alias = "fs", alias = "dir")]
    Directory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Jsonl => "jsonl",
            Self::Directory => "directory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "jsonl" | "log" => Ok(Self::Jsonl),
            "directory" | "dir" | "fs" => Ok(Self::Directory),
            other => anyhow::bail!(
                "Unknown cache backend '{}' (expected memory, jsonl or directory)",
                other
            ),
        }
    }
}

/// Storage backend trait for named caches
///
/// The coalescing index in [`crate::index`] owns the in-memory state and
/// hands writes to the backend one at a time. Indexed backends load every
/// entry once and serve reads from memory; non-indexed backends are asked
/// on every read instead.
///
/// Write errors are returned to the index, which logs and counts them:
/// callers of a cache never see a persistence failure.
#[async_trait]
pub trait CacheBackend<V: CacheValue>: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Where this backend keeps its data, if anywhere
    fn location(&self) -> Option<&Path>;

    /// Whether the index should hold every entry in memory
    fn is_indexed(&self) -> bool {
        true
    }

    /// Load persisted entries. Unreadable data is skipped, never fatal.
    async fn load(&self) -> Vec<CacheEntry<V>>;

    /// Read a single value (non-indexed backends)
    async fn read(&self, _sha: &Digest) -> Option<V> {
        None
    }

    /// Persist a new or updated entry
    async fn write(&self, entry: &CacheEntry<V>) -> Result<()>;

    /// Drop an entry from storage, returning whether anything was removed
    async fn remove(&self, sha: &Digest) -> Result<bool>;

    /// Digests present in storage (non-indexed backends)
    async fn list(&self) -> Vec<Digest> {
        Vec::new()
    }
}

/// Open the backend for a sanitized cache name under `root`
pub fn open_backend<V: CacheValue>(
    kind: BackendKind,
    root: &Path,
    name: &str,
) -> Box<dyn CacheBackend<V>> {
    match kind {
        BackendKind::Memory => Box::new(MemoryStore::new()),
        BackendKind::Jsonl => Box::new(JsonlStore::new(cache_folder(root, name))),
        BackendKind::Directory => Box::new(DirectoryStore::new(cache_folder(root, name))),
    }
}

/// Folder holding the data of one named cache
pub fn cache_folder(root: &Path, name: &str) -> PathBuf {
    root.join(name)
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Sibling temp path for `path`, unique per call within the process
fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(
        ".tmp.{}.{}",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    path.with_file_name(name)
}

/// Write `contents` to a private temp file and rename it over `path`, so
/// readers never see a partial file. The temp file is removed on failure.
pub(crate) async fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> io::Result<()> {
    let temp_path = temp_path_for(path);
    let written = match tokio::fs::write(&temp_path, contents).await {
        Ok(()) => tokio::fs::rename(&temp_path, path).await,
        Err(e) => Err(e),
    };
    if written.is_err() {
        let _ = tokio::fs::remove_file(&temp_path).await;
    }
    written
}
