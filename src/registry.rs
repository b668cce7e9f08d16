//! Named cache registry
//!
//! One [`CacheRegistry`] is built at startup (usually from
//! [`HoardConfig`](crate::config::HoardConfig)) and passed to whoever needs
//! a cache. It hands out one shared [`Cache`] per backend kind and
//! sanitized name, so every component asking for `"summaries"` sees the
//! same entries and the same in-flight computations.

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use crate::error::{CacheError, Result};
use crate::hasher::HashOptions;
use crate::index::Cache;
use crate::logging::{operations, services, status};
use crate::storage::{self, BackendKind, CacheValue};

/// Type-erased view of a registered cache
trait RegisteredCache: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    /// Empty the cache in place, holding its writes until the guard drops
    fn reset(&self) -> BoxFuture<'_, OwnedMutexGuard<()>>;
}

impl<V: CacheValue> RegisteredCache for Cache<V> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn reset(&self) -> BoxFuture<'_, OwnedMutexGuard<()>> {
        self.clear_entries().boxed()
    }
}

type AnyCache = Arc<dyn RegisteredCache>;

/// Table of live caches keyed by `"<kind>.<sanitized name>"`
pub struct CacheRegistry {
    root: PathBuf,
    hash_options: HashOptions,
    caches: Mutex<HashMap<String, AnyCache>>,
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("root", &self.root)
            .field("hash_options", &self.hash_options)
            .field("caches", &self.caches.lock().len())
            .finish()
    }
}

/// Replace every character outside `[A-Za-z0-9_]` with `_`
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn validated_name(name: &str) -> Result<String> {
    if name.trim().is_empty() {
        return Err(CacheError::InvalidName(name.to_string()));
    }
    Ok(sanitize_name(name))
}

fn table_key(kind: BackendKind, sanitized: &str) -> String {
    format!("{}.{}", kind, sanitized)
}

impl CacheRegistry {
    /// Create a registry whose persistent caches live under `root`
    pub fn new(root: impl Into<PathBuf>, hash_options: HashOptions) -> Self {
        Self {
            root: root.into(),
            hash_options,
            caches: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.root
    }

    pub fn hash_options(&self) -> &HashOptions {
        &self.hash_options
    }

    /// Return the cache for `name`, creating it on first use.
    ///
    /// The cache is not loaded here; its first operation loads it.
    pub fn get_or_create<V: CacheValue>(&self, name: &str, kind: BackendKind) -> Result<Cache<V>> {
        let sanitized = validated_name(name)?;
        let key = table_key(kind, &sanitized);

        let mut caches = self.caches.lock();
        if let Some(existing) = caches.get(&key) {
            return downcast(existing, &key);
        }

        let backend = storage::open_backend::<V>(kind, &self.root, &sanitized);
        let cache = Cache::new(sanitized, backend, self.hash_options.clone());
        caches.insert(key.clone(), Arc::new(cache.clone()));

        debug!(
            service = services::REGISTRY,
            operation = operations::OPEN,
            cache = %key,
            location = ?cache.location(),
            "cache created"
        );
        Ok(cache)
    }

    /// Return the cache for `name` only if it was already created
    pub fn lookup<V: CacheValue>(&self, name: &str, kind: BackendKind) -> Result<Option<Cache<V>>> {
        let sanitized = validated_name(name)?;
        let key = table_key(kind, &sanitized);
        self.caches
            .lock()
            .get(&key)
            .map(|existing| downcast(existing, &key))
            .transpose()
    }

    /// Names of the caches created so far, as `"<kind>.<name>"`
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.caches.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Delete on-disk cache data.
    ///
    /// With a name, only that cache's folder goes; without, the whole cache
    /// root. Live caches stay registered and are emptied in place, so every
    /// handle sees the cleared state. Returns the removed paths.
    pub async fn clear(&self, name: Option<&str>) -> Result<Vec<PathBuf>> {
        let (target, sanitized) = match name {
            Some(name) => {
                let sanitized = validated_name(name)?;
                (storage::cache_folder(&self.root, &sanitized), Some(sanitized))
            }
            None => (self.root.clone(), None),
        };

        // Sorted so concurrent clears take write locks in the same order
        let mut live: Vec<(String, AnyCache)> = self
            .caches
            .lock()
            .iter()
            .filter(|(key, _)| match &sanitized {
                Some(sanitized) => {
                    key.split_once('.').map(|(_, n)| n) == Some(sanitized.as_str())
                }
                None => true,
            })
            .map(|(key, cache)| (key.clone(), Arc::clone(cache)))
            .collect();
        live.sort_by(|a, b| a.0.cmp(&b.0));

        let mut held = Vec::with_capacity(live.len());
        for (_, cache) in &live {
            held.push(cache.reset().await);
        }

        let removed = remove_folder(&target).await;
        drop(held);
        removed
    }
}

async fn remove_folder(target: &Path) -> Result<Vec<PathBuf>> {
    match tokio::fs::remove_dir_all(target).await {
        Ok(()) => {
            info!(
                service = services::REGISTRY,
                operation = operations::CLEAR,
                status = status::SUCCESS,
                path = %target.display(),
                "cache cleared"
            );
            Ok(vec![target.to_path_buf()])
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(
                service = services::REGISTRY,
                operation = operations::CLEAR,
                status = status::NOT_FOUND,
                path = %target.display(),
            );
            Ok(Vec::new())
        }
        Err(e) => Err(CacheError::io(target, e)),
    }
}

fn downcast<V: CacheValue>(existing: &AnyCache, key: &str) -> Result<Cache<V>> {
    existing
        .as_any()
        .downcast_ref::<Cache<V>>()
        .cloned()
        .ok_or_else(|| CacheError::TypeMismatch {
            name: key.to_string(),
        })
}
