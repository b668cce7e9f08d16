use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use super::{BackendKind, CacheBackend, CacheEntry, CacheValue};
use crate::hasher::Digest;
use crate::logging::{operations, services, status};

/// One-file-per-entry backend
///
/// Layout: `<cache root>/<name>/<sha>.json`, holding the pretty-printed
/// value only. Nothing is kept in memory; every read is a file read, which
/// suits caches too large to load up front. The logical key is not stored,
/// so enumeration yields digests.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    folder: PathBuf,
}

impl DirectoryStore {
    pub fn new(folder: PathBuf) -> Self {
        Self { folder }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// File holding the value for `sha`
    pub fn entry_path(&self, sha: &Digest) -> PathBuf {
        self.folder.join(format!("{}.json", sha))
    }
}

#[async_trait]
impl<V: CacheValue> CacheBackend<V> for DirectoryStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Directory
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.folder)
    }

    fn is_indexed(&self) -> bool {
        false
    }

    async fn load(&self) -> Vec<CacheEntry<V>> {
        Vec::new()
    }

    async fn read(&self, sha: &Digest) -> Option<V> {
        let path = self.entry_path(sha);
        let content = fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(
                    service = services::DIRECTORY,
                    operation = operations::GET,
                    status = status::ERROR,
                    path = %path.display(),
                    "ignoring unreadable cache entry: {}",
                    e
                );
                None
            }
        }
    }

    async fn write(&self, entry: &CacheEntry<V>) -> Result<()> {
        let path = self.entry_path(&entry.sha);
        let json =
            serde_json::to_string_pretty(&entry.val).context("Failed to serialize cache value")?;

        fs::create_dir_all(&self.folder)
            .await
            .with_context(|| format!("Failed to create {}", self.folder.display()))?;

        super::write_atomic(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(())
    }

    async fn remove(&self, sha: &Digest) -> Result<bool> {
        let path = self.entry_path(sha);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }

    async fn list(&self) -> Vec<Digest> {
        let mut dir = match fs::read_dir(&self.folder).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(
                    service = services::DIRECTORY,
                    operation = operations::LIST,
                    status = status::ERROR,
                    path = %self.folder.display(),
                    "failed to read cache directory: {}",
                    e
                );
                return Vec::new();
            }
        };

        let mut digests = Vec::new();
        loop {
            match dir.next_entry().await {
                Ok(Some(item)) => {
                    let path = item.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    if let Some(sha) = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .and_then(Digest::parse)
                    {
                        digests.push(sha);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        service = services::DIRECTORY,
                        operation = operations::LIST,
                        status = status::ERROR,
                        path = %self.folder.display(),
                        "failed to list cache directory: {}",
                        e
                    );
                    break;
                }
            }
        }

        digests.sort();
        digests
    }
}
