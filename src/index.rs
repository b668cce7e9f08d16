//! Coalescing cache index
//!
//! Every named cache is a [`Cache`] handle over one shared index:
//!
//! - an entry table keyed by digest (for indexed backends),
//! - a pending table of in-flight computations keyed by digest,
//! - a broadcast channel announcing successful writes.
//!
//! `get_or_update` guarantees that at most one updater runs per digest at a
//! time. The first caller registers the computation before awaiting it;
//! later callers await the same shared result. The computation runs on its
//! own task, so dropping any caller (cancellation) never cancels it for the
//! others, and the pending slot is released when it settles, successful or
//! not.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, OnceCell, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::{CacheError, Result};
use crate::hasher::{self, Digest, HashOptions};
use crate::logging::{operations, services, status};
use crate::storage::{BackendKind, CacheBackend, CacheEntry, CacheValue};

/// Capacity of each cache's change channel; slow subscribers see `Lagged`
const EVENT_CHANNEL_CAPACITY: usize = 64;

type Pending<V> = Shared<BoxFuture<'static, Result<V>>>;

/// What a `get_or_update` caller does about a missing entry
enum Claim<V> {
    /// Run the updater and publish its outcome through the sender
    Own(oneshot::Sender<Result<V>>, Pending<V>),
    /// Await a computation another caller owns
    Join(Pending<V>),
}

/// Change notification emitted by a cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// An entry was written
    Changed { sha: Digest },
    /// An entry was removed
    Removed { sha: Digest },
}

/// Result of [`Cache::get_or_update`]
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup<V> {
    pub sha: Digest,
    pub value: V,
    /// False only for the caller whose updater produced the value
    pub cached: bool,
}

/// Point-in-time counters for a cache
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries held in memory (always 0 for non-indexed backends)
    pub entries: usize,
    /// Computations currently in flight
    pub pending: usize,
    /// Persistence failures since the cache was opened
    pub write_failures: u64,
}

struct State<V> {
    entries: HashMap<Digest, CacheEntry<V>>,
    pending: HashMap<Digest, Pending<V>>,
}

struct Inner<V: CacheValue> {
    name: String,
    backend: Box<dyn CacheBackend<V>>,
    hash_options: HashOptions,
    loaded: OnceCell<()>,
    state: Mutex<State<V>>,
    /// Serializes writes so the backend sees them in memory order
    writes: Arc<tokio::sync::Mutex<()>>,
    events: broadcast::Sender<CacheEvent>,
    write_failures: AtomicU64,
}

/// Handle to a named cache. Clones share the same index.
pub struct Cache<V: CacheValue> {
    inner: Arc<Inner<V>>,
}

impl<V: CacheValue> Clone for Cache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: CacheValue> std::fmt::Debug for Cache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.inner.name)
            .field("kind", &self.inner.backend.kind())
            .finish()
    }
}

/// Releases a pending slot when the computation settles or unwinds
struct PendingGuard<V: CacheValue> {
    inner: Arc<Inner<V>>,
    sha: Digest,
}

impl<V: CacheValue> Drop for PendingGuard<V> {
    fn drop(&mut self) {
        self.inner.state.lock().pending.remove(&self.sha);
    }
}

impl<V: CacheValue> Cache<V> {
    /// Wrap a backend in a fresh index
    pub fn new(
        name: impl Into<String>,
        backend: Box<dyn CacheBackend<V>>,
        hash_options: HashOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                backend,
                hash_options,
                loaded: OnceCell::new(),
                state: Mutex::new(State {
                    entries: HashMap::new(),
                    pending: HashMap::new(),
                }),
                writes: Arc::new(tokio::sync::Mutex::new(())),
                events,
                write_failures: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> BackendKind {
        self.inner.backend.kind()
    }

    /// Log file or folder backing this cache
    pub fn location(&self) -> Option<&Path> {
        self.inner.backend.location()
    }

    /// Whether two handles point at the same cache instance
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Receive an event for every successful write or removal.
    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        CacheStats {
            entries: state.entries.len(),
            pending: state.pending.len(),
            write_failures: self.inner.write_failures.load(Ordering::Relaxed),
        }
    }

    /// Digest of `key` under this cache's format version
    pub fn get_sha<K: Serialize + ?Sized>(&self, key: &K) -> Result<Digest> {
        hasher::digest(key, &self.inner.hash_options)
    }

    /// Load persisted entries once. Concurrent callers share one load.
    pub async fn initialize(&self) {
        self.inner.initialize().await;
    }

    pub async fn get<K: Serialize + ?Sized>(&self, key: &K) -> Result<Option<V>> {
        self.initialize().await;
        let sha = self.get_sha(key)?;
        let value = self.inner.lookup(&sha).await;
        let outcome = if value.is_some() { status::HIT } else { status::MISS };
        debug!(
            service = services::CACHE,
            operation = operations::GET,
            status = outcome,
            cache = %self.inner.name,
            sha = %sha,
        );
        Ok(value)
    }

    /// Store `val` under `key`.
    ///
    /// Writing a value equal to the stored one is a no-op. Persistence
    /// failures are logged and counted in [`CacheStats::write_failures`];
    /// only key or value serialization errors are returned.
    pub async fn set<K: Serialize + ?Sized>(&self, key: &K, val: V) -> Result<()> {
        self.initialize().await;
        let sha = self.get_sha(key)?;
        let key =
            serde_json::to_value(key).map_err(|e| CacheError::KeySerialization(Arc::new(e)))?;
        self.inner
            .store(CacheEntry {
                sha,
                key: Some(key),
                val,
            })
            .await
    }

    /// Delete the entry for `key`, returning whether one existed
    pub async fn remove<K: Serialize + ?Sized>(&self, key: &K) -> Result<bool> {
        self.initialize().await;
        let sha = self.get_sha(key)?;
        Ok(self.inner.remove(&sha).await)
    }

    /// Return the cached value for `key`, computing it with `updater` on a
    /// miss. Every computed value is stored.
    pub async fn get_or_update<K, F, Fut>(&self, key: &K, updater: F) -> Result<Lookup<V>>
    where
        K: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        self.get_or_update_with(key, updater, |_: &V| true).await
    }

    /// Like [`Cache::get_or_update`], storing the computed value only when
    /// `validator` accepts it. Rejected values are still returned.
    pub async fn get_or_update_with<K, F, Fut, P>(
        &self,
        key: &K,
        updater: F,
        validator: P,
    ) -> Result<Lookup<V>>
    where
        K: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
        P: FnOnce(&V) -> bool + Send + 'static,
    {
        self.initialize().await;
        let sha = self.get_sha(key)?;
        let key_json =
            serde_json::to_value(key).map_err(|e| CacheError::KeySerialization(Arc::new(e)))?;

        if !self.inner.backend.is_indexed() {
            let in_flight = self.inner.state.lock().pending.get(&sha).cloned();
            if let Some(pending) = in_flight {
                return self.join(sha, pending).await;
            }
            if let Some(value) = self.inner.backend.read(&sha).await {
                self.log_lookup(&sha, status::HIT);
                return Ok(Lookup {
                    sha,
                    value,
                    cached: true,
                });
            }
        }

        let claim = {
            let mut state = self.inner.state.lock();

            if let Some(entry) = state.entries.get(&sha) {
                let value = entry.val.clone();
                drop(state);
                self.log_lookup(&sha, status::HIT);
                return Ok(Lookup {
                    sha,
                    value,
                    cached: true,
                });
            }

            match state.pending.get(&sha) {
                Some(pending) => Claim::Join(pending.clone()),
                None => {
                    let (tx, rx) = oneshot::channel();
                    let shared = async move {
                        rx.await.unwrap_or_else(|_| {
                            Err(CacheError::Update(Arc::new(anyhow::anyhow!(
                                "cache updater stopped before producing a value"
                            ))))
                        })
                    }
                    .boxed()
                    .shared();
                    state.pending.insert(sha.clone(), shared.clone());
                    Claim::Own(tx, shared)
                }
            }
        };

        match claim {
            Claim::Own(tx, shared) => {
                // The slot exists; the guard releases it even if `updater` panics
                let guard = PendingGuard {
                    inner: Arc::clone(&self.inner),
                    sha: sha.clone(),
                };
                // Called outside the state lock so it may use this cache
                let updater = updater();
                let inner = Arc::clone(&self.inner);
                let task_sha = sha.clone();
                tokio::spawn(async move {
                    let outcome = inner
                        .compute(task_sha, key_json, updater, validator, guard)
                        .await;
                    let _ = tx.send(outcome);
                });

                self.log_lookup(&sha, status::MISS);
                let value = shared.await?;
                Ok(Lookup {
                    sha,
                    value,
                    cached: false,
                })
            }
            Claim::Join(pending) => self.join(sha, pending).await,
        }
    }

    /// Drop every entry held in memory and block writes until the returned
    /// guard is dropped, so the backing storage can be wiped underneath.
    pub(crate) async fn clear_entries(&self) -> OwnedMutexGuard<()> {
        self.initialize().await;
        let writes = Arc::clone(&self.inner.writes).lock_owned().await;
        let cleared: Vec<Digest> = self
            .inner
            .state
            .lock()
            .entries
            .drain()
            .map(|(sha, _)| sha)
            .collect();
        for sha in cleared {
            let _ = self.inner.events.send(CacheEvent::Removed { sha });
        }
        writes
    }

    /// Await a computation started by another caller
    async fn join(&self, sha: Digest, pending: Pending<V>) -> Result<Lookup<V>> {
        self.log_lookup(&sha, status::PENDING);
        let value = pending.await?;
        Ok(Lookup {
            sha,
            value,
            cached: true,
        })
    }

    fn log_lookup(&self, sha: &Digest, outcome: &'static str) {
        debug!(
            service = services::CACHE,
            operation = operations::GET_OR_UPDATE,
            status = outcome,
            cache = %self.inner.name,
            sha = %sha,
        );
    }

    /// Snapshot of every entry. Non-indexed backends read each file and
    /// return entries without keys.
    pub async fn entries(&self) -> Vec<CacheEntry<V>> {
        self.initialize().await;
        if self.inner.backend.is_indexed() {
            let mut entries: Vec<_> = self.inner.state.lock().entries.values().cloned().collect();
            entries.sort_by(|a, b| a.sha.cmp(&b.sha));
            return entries;
        }

        let mut entries = Vec::new();
        for sha in self.inner.backend.list().await {
            if let Some(val) = self.inner.backend.read(&sha).await {
                entries.push(CacheEntry {
                    sha,
                    key: None,
                    val,
                });
            }
        }
        entries
    }

    pub async fn values(&self) -> Vec<V> {
        self.entries().await.into_iter().map(|e| e.val).collect()
    }

    /// Logical keys, for backends that retain them
    pub async fn keys(&self) -> Vec<Value> {
        self.entries()
            .await
            .into_iter()
            .filter_map(|e| e.key)
            .collect()
    }

    /// Digests of every stored entry
    pub async fn digests(&self) -> Vec<Digest> {
        self.initialize().await;
        if self.inner.backend.is_indexed() {
            let mut digests: Vec<_> = self.inner.state.lock().entries.keys().cloned().collect();
            digests.sort();
            digests
        } else {
            self.inner.backend.list().await
        }
    }

    /// Look an entry up by digest, e.g. from a link that only carries the sha
    pub async fn entry_by_sha(&self, sha: &Digest) -> Option<CacheEntry<V>> {
        self.initialize().await;
        if self.inner.backend.is_indexed() {
            self.inner.state.lock().entries.get(sha).cloned()
        } else {
            let val = self.inner.backend.read(sha).await?;
            Some(CacheEntry {
                sha: sha.clone(),
                key: None,
                val,
            })
        }
    }
}

impl<V: CacheValue> Inner<V> {
    async fn initialize(&self) {
        self.loaded
            .get_or_init(|| async {
                if !self.backend.is_indexed() {
                    return;
                }
                let loaded = self.backend.load().await;
                let count = loaded.len();
                let mut state = self.state.lock();
                for entry in loaded {
                    state.entries.insert(entry.sha.clone(), entry);
                }
                debug!(
                    service = services::CACHE,
                    operation = operations::LOAD,
                    cache = %self.name,
                    kind = %self.backend.kind(),
                    entry_count = count,
                    "cache initialized"
                );
            })
            .await;
    }

    async fn lookup(&self, sha: &Digest) -> Option<V> {
        if self.backend.is_indexed() {
            self.state.lock().entries.get(sha).map(|e| e.val.clone())
        } else {
            self.backend.read(sha).await
        }
    }

    async fn store(&self, entry: CacheEntry<V>) -> Result<()> {
        let new_val = serde_json::to_value(&entry.val)
            .map_err(|e| CacheError::ValueSerialization(Arc::new(e)))?;
        let _write = self.writes.lock().await;

        let unchanged = if self.backend.is_indexed() {
            self.replace_indexed(&entry, &new_val)
        } else {
            match self.backend.read(&entry.sha).await {
                Some(existing) => serde_json::to_value(&existing).ok().as_ref() == Some(&new_val),
                None => false,
            }
        };
        if unchanged {
            return Ok(());
        }

        match self.backend.write(&entry).await {
            Ok(()) => {
                debug!(
                    service = services::CACHE,
                    operation = operations::SET,
                    status = status::SUCCESS,
                    cache = %self.name,
                    sha = %entry.sha,
                );
                let _ = self.events.send(CacheEvent::Changed { sha: entry.sha });
            }
            Err(e) => self.record_write_failure(operations::SET, &entry.sha, &e),
        }
        Ok(())
    }

    /// Put `entry` in the table unless an equal entry is already there.
    /// Returns true when nothing changed.
    fn replace_indexed(&self, entry: &CacheEntry<V>, new_val: &Value) -> bool {
        let mut state = self.state.lock();
        if let Some(existing) = state.entries.get(&entry.sha) {
            if existing.key == entry.key
                && serde_json::to_value(&existing.val).ok().as_ref() == Some(new_val)
            {
                return true;
            }
        }
        state.entries.insert(entry.sha.clone(), entry.clone());
        false
    }

    async fn remove(&self, sha: &Digest) -> bool {
        let _write = self.writes.lock().await;

        let indexed = self.backend.is_indexed();
        let held = indexed && self.state.lock().entries.remove(sha).is_some();
        let removed = match self.backend.remove(sha).await {
            Ok(found) if !indexed => found,
            Ok(_) => held,
            Err(e) => {
                self.record_write_failure(operations::DELETE, sha, &e);
                held
            }
        };

        if removed {
            debug!(
                service = services::CACHE,
                operation = operations::DELETE,
                status = status::SUCCESS,
                cache = %self.name,
                sha = %sha,
            );
            let _ = self.events.send(CacheEvent::Removed { sha: sha.clone() });
        }
        removed
    }

    fn record_write_failure(&self, operation: &'static str, sha: &Digest, error: &anyhow::Error) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
        warn!(
            service = services::CACHE,
            operation = operation,
            status = status::ERROR,
            cache = %self.name,
            sha = %sha,
            "cache write failed: {:#}",
            error
        );
    }

    /// Run an updater to completion and persist its value. The pending
    /// slot is released when `_guard` drops, after the value is stored.
    async fn compute<Fut, P>(
        &self,
        sha: Digest,
        key: Value,
        updater: Fut,
        validator: P,
        _guard: PendingGuard<V>,
    ) -> Result<V>
    where
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
        P: FnOnce(&V) -> bool + Send + 'static,
    {
        let value = updater.await.map_err(|e| CacheError::Update(Arc::new(e)))?;

        if validator(&value) {
            let entry = CacheEntry {
                sha: sha.clone(),
                key: Some(key),
                val: value.clone(),
            };
            if let Err(e) = self.store(entry).await {
                warn!(
                    service = services::CACHE,
                    operation = operations::GET_OR_UPDATE,
                    status = status::ERROR,
                    cache = %self.name,
                    sha = %sha,
                    "computed value not cached: {}",
                    e
                );
            }
        } else {
            debug!(
                service = services::CACHE,
                operation = operations::GET_OR_UPDATE,
                status = status::REJECTED,
                cache = %self.name,
                sha = %sha,
                "validator rejected computed value"
            );
        }

        Ok(value)
    }
}
