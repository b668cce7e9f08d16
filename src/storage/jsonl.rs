//! Append-only NDJSON log backend
//!
//! Layout: `<cache root>/<name>/db.jsonl`, one `{"sha","key","val"}` object
//! per line. Every `set` appends a line, so an update is on disk as soon as
//! it returns. Repeated updates of hot keys grow the file; on load, when
//! more than half of the parsed lines are superseded duplicates, the log is
//! rewritten keeping only the last line of each digest, in place.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{BackendKind, CacheBackend, CacheEntry, CacheValue};
use crate::hasher::Digest;
use crate::logging::{operations, services, status};

/// File name of the log inside a cache folder
pub const LOG_FILE_NAME: &str = "db.jsonl";

/// Log-backed store for one named cache
#[derive(Debug, Clone)]
pub struct JsonlStore {
    folder: PathBuf,
    path: PathBuf,
}

/// Parsed view of a log file
struct ParsedLog<V> {
    /// Well-formed lines in file order, with their raw text
    lines: Vec<(String, CacheEntry<V>)>,
    /// Index into `lines` of the last occurrence of each digest
    latest: HashMap<Digest, usize>,
    duplicates: usize,
    malformed: usize,
    first_error: Option<String>,
}

impl<V> ParsedLog<V> {
    /// Whether superseded lines outnumber live ones
    fn needs_compaction(&self) -> bool {
        self.duplicates * 2 > self.lines.len()
    }

    fn is_latest(&self, index: usize, sha: &Digest) -> bool {
        self.latest.get(sha) == Some(&index)
    }
}

fn parse_log<V: DeserializeOwned>(content: &str) -> ParsedLog<V> {
    let mut parsed = ParsedLog {
        lines: Vec::new(),
        latest: HashMap::new(),
        duplicates: 0,
        malformed: 0,
        first_error: None,
    };

    for (line_no, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<CacheEntry<V>>(trimmed) {
            Ok(entry) => {
                let index = parsed.lines.len();
                if parsed.latest.insert(entry.sha.clone(), index).is_some() {
                    parsed.duplicates += 1;
                }
                parsed.lines.push((trimmed.to_string(), entry));
            }
            Err(e) => {
                parsed.malformed += 1;
                if parsed.first_error.is_none() {
                    parsed.first_error = Some(format!("line {}: {}", line_no + 1, e));
                }
            }
        }
    }

    parsed
}

#[derive(Deserialize)]
struct ShaOnly {
    sha: Digest,
}

impl JsonlStore {
    pub fn new(folder: PathBuf) -> Self {
        let path = folder.join(LOG_FILE_NAME);
        Self { folder, path }
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_log(&self) -> Option<String> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(
                    service = services::JSONL,
                    operation = operations::LOAD,
                    status = status::ERROR,
                    path = %self.path.display(),
                    "failed to read cache log: {}",
                    e
                );
                None
            }
        }
    }

    /// Replace the log with `lines`, via a temp file and rename
    async fn rewrite(&self, lines: &[&str]) -> Result<()> {
        let mut content = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
        for line in lines {
            content.push_str(line);
            content.push('\n');
        }

        super::write_atomic(&self.path, content)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        Ok(())
    }
}

#[async_trait]
impl<V: CacheValue> CacheBackend<V> for JsonlStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Jsonl
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }

    async fn load(&self) -> Vec<CacheEntry<V>> {
        if let Err(e) = fs::create_dir_all(&self.folder).await {
            warn!(
                service = services::JSONL,
                operation = operations::LOAD,
                status = status::ERROR,
                path = %self.folder.display(),
                "failed to create cache folder: {}",
                e
            );
        }

        let Some(content) = self.read_log().await else {
            return Vec::new();
        };

        let parsed = parse_log::<V>(&content);

        if parsed.malformed > 0 {
            warn!(
                service = services::JSONL,
                operation = operations::LOAD,
                path = %self.path.display(),
                malformed_count = parsed.malformed,
                first_error = parsed.first_error.as_deref().unwrap_or_default(),
                "skipped malformed cache log lines"
            );
        }

        if parsed.needs_compaction() {
            let survivors: Vec<&str> = parsed
                .lines
                .iter()
                .enumerate()
                .filter(|(i, (_, entry))| parsed.is_latest(*i, &entry.sha))
                .map(|(_, (raw, _))| raw.as_str())
                .collect();

            match self.rewrite(&survivors).await {
                Ok(()) => info!(
                    service = services::JSONL,
                    operation = operations::COMPACT,
                    status = status::SUCCESS,
                    path = %self.path.display(),
                    entry_count = survivors.len(),
                    removed_count = parsed.lines.len() - survivors.len(),
                    "compacted cache log"
                ),
                Err(e) => warn!(
                    service = services::JSONL,
                    operation = operations::COMPACT,
                    status = status::ERROR,
                    path = %self.path.display(),
                    "failed to compact cache log: {:#}",
                    e
                ),
            }
        }

        let ParsedLog { lines, latest, .. } = parsed;
        let entries: Vec<CacheEntry<V>> = lines
            .into_iter()
            .enumerate()
            .filter(|(i, (_, entry))| latest.get(&entry.sha) == Some(i))
            .map(|(_, (_, entry))| entry)
            .collect();

        debug!(
            service = services::JSONL,
            operation = operations::LOAD,
            path = %self.path.display(),
            entry_count = entries.len(),
            "loaded cache log"
        );

        entries
    }

    async fn write(&self, entry: &CacheEntry<V>) -> Result<()> {
        let mut line = serde_json::to_string(entry).context("Failed to serialize cache entry")?;
        line.push('\n');

        fs::create_dir_all(&self.folder)
            .await
            .with_context(|| format!("Failed to create {}", self.folder.display()))?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        file.flush().await?;

        Ok(())
    }

    async fn remove(&self, sha: &Digest) -> Result<bool> {
        let Some(content) = self.read_log().await else {
            return Ok(false);
        };

        let mut removed = false;
        let kept: Vec<&str> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter(|line| {
                let matches = serde_json::from_str::<ShaOnly>(line)
                    .map(|parsed| &parsed.sha == sha)
                    .unwrap_or(false);
                removed |= matches;
                !matches
            })
            .collect();

        if removed {
            self.rewrite(&kept).await?;
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn entry(sha: &str, val: i64) -> CacheEntry<i64> {
        CacheEntry {
            sha: Digest::parse(sha).unwrap(),
            key: Some(json!(format!("key-{}", sha))),
            val,
        }
    }

    fn line_count(path: &Path) -> usize {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .count()
    }

    #[tokio::test]
    async fn test_missing_log_loads_empty() {
        let temp = TempDir::new().unwrap();
        let store = JsonlStore::new(temp.path().join("empty"));

        let entries: Vec<CacheEntry<i64>> = store.load().await;
        assert!(entries.is_empty());
        assert!(temp.path().join("empty").is_dir());
    }

    #[tokio::test]
    async fn test_append_and_load() {
        let temp = TempDir::new().unwrap();
        let store = JsonlStore::new(temp.path().join("c"));

        store.write(&entry("aa", 1)).await.unwrap();
        store.write(&entry("bb", 2)).await.unwrap();

        let content = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(
            content.lines().next().unwrap(),
            r#"{"sha":"aa","key":"key-aa","val":1}"#
        );

        let entries: Vec<CacheEntry<i64>> = store.load().await;
        assert_eq!(entries, vec![entry("aa", 1), entry("bb", 2)]);
    }

    #[tokio::test]
    async fn test_load_skips_malformed_lines() {
        let temp = TempDir::new().unwrap();
        let store = JsonlStore::new(temp.path().join("c"));
        std::fs::create_dir_all(temp.path().join("c")).unwrap();

        let mut content = String::new();
        for i in 0..10 {
            let line = serde_json::to_string(&entry(&format!("{:02x}", i), i)).unwrap();
            content.push_str(&line);
            content.push('\n');
            if i == 4 {
                content.push_str("{\"sha\": \"broken\n");
                content.push_str("\n   \n");
            }
        }
        std::fs::write(store.path(), content).unwrap();

        let entries: Vec<CacheEntry<i64>> = store.load().await;
        assert_eq!(entries.len(), 10);
        assert_eq!(entries[9], entry("09", 9));
    }

    #[tokio::test]
    async fn test_compaction_keeps_last_write() {
        let temp = TempDir::new().unwrap();
        let store = JsonlStore::new(temp.path().join("c"));

        for i in 0..10 {
            store.write(&entry("aa", i)).await.unwrap();
        }
        assert_eq!(line_count(store.path()), 10);

        let entries: Vec<CacheEntry<i64>> = store.load().await;
        assert_eq!(entries, vec![entry("aa", 9)]);
        assert_eq!(line_count(store.path()), 1);

        let reloaded: Vec<CacheEntry<i64>> = store.load().await;
        assert_eq!(reloaded, vec![entry("aa", 9)]);
    }

    #[tokio::test]
    async fn test_compaction_preserves_line_positions() {
        let temp = TempDir::new().unwrap();
        let store = JsonlStore::new(temp.path().join("c"));

        // 7 lines, 4 duplicates of "aa": 4 * 2 > 7
        store.write(&entry("aa", 1)).await.unwrap();
        store.write(&entry("bb", 1)).await.unwrap();
        for i in 2..=5 {
            store.write(&entry("aa", i)).await.unwrap();
        }
        store.write(&entry("cc", 1)).await.unwrap();

        let entries: Vec<CacheEntry<i64>> = store.load().await;
        assert_eq!(entries, vec![entry("bb", 1), entry("aa", 5), entry("cc", 1)]);

        let content = std::fs::read_to_string(store.path()).unwrap();
        let shas: Vec<String> = content
            .lines()
            .map(|l| serde_json::from_str::<CacheEntry<i64>>(l).unwrap().sha.to_string())
            .collect();
        assert_eq!(shas, vec!["bb", "aa", "cc"]);
    }

    #[tokio::test]
    async fn test_no_compaction_below_threshold() {
        let temp = TempDir::new().unwrap();
        let store = JsonlStore::new(temp.path().join("c"));

        // 4 lines, 2 duplicates: 2 * 2 is not > 4
        store.write(&entry("aa", 1)).await.unwrap();
        store.write(&entry("bb", 1)).await.unwrap();
        store.write(&entry("aa", 2)).await.unwrap();
        store.write(&entry("bb", 2)).await.unwrap();

        let entries: Vec<CacheEntry<i64>> = store.load().await;
        assert_eq!(entries, vec![entry("aa", 2), entry("bb", 2)]);
        assert_eq!(line_count(store.path()), 4);
    }

    #[tokio::test]
    async fn test_remove_rewrites_log() {
        let temp = TempDir::new().unwrap();
        let store = JsonlStore::new(temp.path().join("c"));

        store.write(&entry("aa", 1)).await.unwrap();
        store.write(&entry("bb", 1)).await.unwrap();
        store.write(&entry("aa", 2)).await.unwrap();

        let sha = Digest::parse("aa").unwrap();
        assert!(CacheBackend::<i64>::remove(&store, &sha).await.unwrap());
        assert!(!CacheBackend::<i64>::remove(&store, &sha).await.unwrap());

        let entries: Vec<CacheEntry<i64>> = store.load().await;
        assert_eq!(entries, vec![entry("bb", 1)]);
    }

    #[tokio::test]
    async fn test_wrong_value_type_counts_as_malformed() {
        let temp = TempDir::new().unwrap();
        let store = JsonlStore::new(temp.path().join("c"));
        std::fs::create_dir_all(temp.path().join("c")).unwrap();
        std::fs::write(
            store.path(),
            "{\"sha\":\"aa\",\"val\":\"text\"}\n{\"sha\":\"bb\",\"val\":3}\n",
        )
        .unwrap();

        let entries: Vec<CacheEntry<i64>> = store.load().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].val, 3);
        assert_eq!(entries[0].key, None);
    }
}
