//! Content-addressed blob store
//!
//! Generated artifacts (images, audio, documents) are written once under
//! the hash of their own bytes: `<dir>/<sha>.<ext>`. Writing the same bytes
//! again finds the existing file and touches nothing.

use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::hasher::{self, Digest, DEFAULT_BLOB_HASH_LENGTH};
use crate::logging::{operations, services, status};
use crate::storage;

/// Extension used when the content type cannot be recognized
pub const FALLBACK_EXTENSION: &str = "bin";

/// Magic byte prefixes, checked in order
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "png"),
    (b"\xff\xd8\xff", "jpg"),
    (b"GIF87a", "gif"),
    (b"GIF89a", "gif"),
    (b"%PDF-", "pdf"),
    (b"PK\x03\x04", "zip"),
    (b"\x1f\x8b", "gz"),
    (b"BM", "bmp"),
    (b"OggS", "ogg"),
    (b"ID3", "mp3"),
    (b"\xff\xfb", "mp3"),
    (b"\xff\xf3", "mp3"),
    (b"\xff\xf2", "mp3"),
];

/// Guess a file extension from the leading bytes of `bytes`
pub fn infer_extension(bytes: &[u8]) -> &'static str {
    // RIFF containers carry their type at offset 8
    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" {
        match &bytes[8..12] {
            b"WEBP" => return "webp",
            b"WAVE" => return "wav",
            _ => {}
        }
    }

    SIGNATURES
        .iter()
        .find(|(magic, _)| bytes.starts_with(magic))
        .map(|(_, ext)| *ext)
        .unwrap_or(FALLBACK_EXTENSION)
}

/// A blob on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBlob {
    pub path: PathBuf,
    pub sha: Digest,
    /// False when the file already existed
    pub created: bool,
}

/// Outcome of [`BlobStore::cache_image`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Remote image, left for the consumer to fetch
    Url(String),
    /// Local image copied into the store
    Blob(CachedBlob),
}

/// Writer for content-addressed files
#[derive(Debug, Clone)]
pub struct BlobStore {
    hash_length: usize,
}

impl Default for BlobStore {
    fn default() -> Self {
        Self::new(DEFAULT_BLOB_HASH_LENGTH)
    }
}

impl BlobStore {
    /// `hash_length` hex characters of the content SHA256 name each file
    pub fn new(hash_length: usize) -> Self {
        Self { hash_length }
    }

    /// Path `bytes` are (or would be) stored at
    pub fn path_for(&self, dir: &Path, bytes: &[u8], ext: Option<&str>) -> PathBuf {
        let sha = hasher::digest_bytes(bytes, self.hash_length);
        blob_path(dir, &sha, ext.unwrap_or_else(|| infer_extension(bytes)))
    }

    /// Store `bytes` under their content hash.
    ///
    /// Returns `None` for empty input. `ext` overrides the sniffed extension.
    pub async fn write_cached(
        &self,
        dir: &Path,
        bytes: &[u8],
        ext: Option<&str>,
    ) -> Result<Option<CachedBlob>> {
        if bytes.is_empty() {
            return Ok(None);
        }

        let sha = hasher::digest_bytes(bytes, self.hash_length);
        let ext = ext
            .map(|e| e.trim_start_matches('.'))
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| infer_extension(bytes));
        let path = blob_path(dir, &sha, ext);

        if fs::try_exists(&path).await.unwrap_or(false) {
            debug!(
                service = services::BLOB,
                operation = operations::WRITE,
                status = status::HIT,
                sha = %sha,
                path = %path.display(),
            );
            return Ok(Some(CachedBlob {
                path,
                sha,
                created: false,
            }));
        }

        fs::create_dir_all(dir)
            .await
            .map_err(|e| CacheError::io(dir, e))?;

        if let Err(e) = storage::write_atomic(&path, bytes).await {
            // A concurrent writer of the same bytes may have won the rename
            if fs::try_exists(&path).await.unwrap_or(false) {
                return Ok(Some(CachedBlob {
                    path,
                    sha,
                    created: false,
                }));
            }
            return Err(CacheError::io(&path, e));
        }

        debug!(
            service = services::BLOB,
            operation = operations::WRITE,
            status = status::SUCCESS,
            sha = %sha,
            path = %path.display(),
            size_bytes = bytes.len(),
        );

        Ok(Some(CachedBlob {
            path,
            sha,
            created: true,
        }))
    }

    /// Store `value` as pretty-printed JSON
    pub async fn write_cached_json<T: Serialize + ?Sized>(
        &self,
        dir: &Path,
        value: &T,
    ) -> Result<Option<CachedBlob>> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| CacheError::ValueSerialization(Arc::new(e)))?;
        self.write_cached(dir, json.as_bytes(), Some("json")).await
    }

    /// Resolve an image reference for embedding.
    ///
    /// `http://` and `https://` URLs are returned unchanged; anything else is
    /// read as a local file and stored in `dir`. Empty input gives `None`.
    pub async fn cache_image(&self, source: &str, dir: &Path) -> Result<Option<ImageSource>> {
        let source = source.trim();
        if source.is_empty() {
            return Ok(None);
        }
        if is_remote(source) {
            return Ok(Some(ImageSource::Url(source.to_string())));
        }

        let bytes = match fs::read(source).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(
                    service = services::BLOB,
                    operation = operations::WRITE,
                    status = status::NOT_FOUND,
                    path = %source,
                );
                return Err(CacheError::io(source, e));
            }
            Err(e) => return Err(CacheError::io(source, e)),
        };

        let ext = Path::new(source)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);
        Ok(self
            .write_cached(dir, &bytes, ext.as_deref())
            .await?
            .map(ImageSource::Blob))
    }
}

fn blob_path(dir: &Path, sha: &Digest, ext: &str) -> PathBuf {
    dir.join(format!("{}.{}", sha, ext))
}

fn is_remote(source: &str) -> bool {
    let lower = source.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
