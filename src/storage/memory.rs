use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use super::{BackendKind, CacheBackend, CacheEntry, CacheValue};
use crate::hasher::Digest;

/// Process-local backend: the index is the whole store
#[derive(Debug, Default)]
pub struct MemoryStore;

impl MemoryStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<V: CacheValue> CacheBackend<V> for MemoryStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn location(&self) -> Option<&Path> {
        None
    }

    async fn load(&self) -> Vec<CacheEntry<V>> {
        Vec::new()
    }

    async fn write(&self, _entry: &CacheEntry<V>) -> Result<()> {
        Ok(())
    }

    async fn remove(&self, _sha: &Digest) -> Result<bool> {
        // Nothing on disk; the index drops the entry
        Ok(false)
    }
}
