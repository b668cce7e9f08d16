/// `hoard blob` command implementation
///
/// Stores a file under the hash of its content.
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;

use super::Workspace;
use crate::cli_utils::hoard_prefix;

/// Default blob folder inside the cache root. The dot keeps it out of the
/// namespace of cache folders, which only ever contain `[A-Za-z0-9_]`.
const BLOB_DIR: &str = ".blobs";

#[derive(Serialize)]
struct BlobOutput {
    path: String,
    sha: String,
    created: bool,
}

pub async fn run(
    workspace: &Workspace,
    file: &str,
    dir: Option<&str>,
    ext: Option<&str>,
    json: bool,
) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read file: {}", file))?;

    let dir = dir
        .map(PathBuf::from)
        .unwrap_or_else(|| workspace.cache_root.join(BLOB_DIR));

    let store = workspace.config().blob_store();
    let Some(blob) = store
        .write_cached(&dir, &bytes, ext)
        .await
        .with_context(|| format!("Failed to store {}", file))?
    else {
        anyhow::bail!("Refusing to store empty file: {}", file);
    };

    if json {
        let output = BlobOutput {
            path: blob.path.display().to_string(),
            sha: blob.sha.to_string(),
            created: blob.created,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        let verb = if blob.created { "Stored" } else { "Already stored" };
        println!("{} {}: {}", hoard_prefix(), verb, blob.path.display());
    }

    Ok(())
}
