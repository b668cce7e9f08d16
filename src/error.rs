use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced to cache callers.
///
/// Persistence failures are not reported here. They are logged and counted
/// in [`CacheStats::write_failures`](crate::index::CacheStats).
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Failed to serialize cache key: {0}")]
    KeySerialization(Arc<serde_json::Error>),

    #[error("Failed to serialize cache value: {0}")]
    ValueSerialization(Arc<serde_json::Error>),

    /// The updater passed to `get_or_update` failed. Every caller that was
    /// waiting on the same computation receives the same error.
    #[error("Cache update failed: {0}")]
    Update(Arc<anyhow::Error>),

    #[error("Cache '{name}' is already registered with a different value type")]
    TypeMismatch { name: String },

    #[error("Invalid cache name: {0:?}")]
    InvalidName(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl CacheError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
