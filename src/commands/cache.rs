/// `hoard get|set|delete|list|sha|clear` command implementations
///
/// Cache values handled from the command line are untyped JSON.
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use super::Workspace;
use crate::cli::{CacheTarget, KeyArgs};
use crate::cli_utils::{hoard_prefix, parse_json_or_string};
use crate::hasher::{self, Digest};
use crate::index::Cache;

// JSON output structures
#[derive(Serialize)]
struct GetOutput<'a> {
    cache: &'a str,
    sha: &'a Digest,
    found: bool,
    value: Option<&'a Value>,
}

#[derive(Serialize)]
struct SetOutput<'a> {
    cache: &'a str,
    sha: &'a Digest,
    stored: bool,
}

#[derive(Serialize)]
struct DeleteOutput<'a> {
    cache: &'a str,
    sha: &'a Digest,
    deleted: bool,
}

#[derive(Serialize)]
struct ClearOutput {
    removed: Vec<String>,
}

fn parse_key(args: &KeyArgs) -> Result<Value> {
    if args.json_key {
        serde_json::from_str(&args.key)
            .with_context(|| format!("--json-key given but key is not valid JSON: {}", args.key))
    } else {
        Ok(Value::String(args.key.clone()))
    }
}

fn open(workspace: &Workspace, target: &CacheTarget) -> Result<Cache<Value>> {
    let kind = target
        .backend
        .unwrap_or(workspace.config().cache.default_backend);
    workspace
        .registry()
        .get_or_create::<Value>(&target.name, kind)
        .with_context(|| format!("Failed to open cache: {}", target.name))
}

/// Human readable rendering: strings raw, everything else pretty JSON
fn render(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Ok(serde_json::to_string_pretty(other)?),
    }
}

/// Print the value stored under a key
pub async fn get(
    workspace: &Workspace,
    target: &CacheTarget,
    key: &KeyArgs,
    json: bool,
) -> Result<()> {
    let cache = open(workspace, target)?;
    let key_value = parse_key(key)?;
    let sha = cache.get_sha(&key_value)?;
    let value = cache.get(&key_value).await?;

    if json {
        let output = GetOutput {
            cache: cache.name(),
            sha: &sha,
            found: value.is_some(),
            value: value.as_ref(),
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    match value {
        Some(value) => {
            println!("{}", render(&value)?);
            Ok(())
        }
        None => anyhow::bail!("Key not found in cache '{}': {}", cache.name(), key.key),
    }
}

/// Store a value under a key
pub async fn set(
    workspace: &Workspace,
    target: &CacheTarget,
    key: &KeyArgs,
    value: &str,
    json: bool,
) -> Result<()> {
    let cache = open(workspace, target)?;
    let key_value = parse_key(key)?;
    let sha = cache.get_sha(&key_value)?;

    cache.set(&key_value, parse_json_or_string(value)).await?;

    if cache.stats().write_failures > 0 {
        anyhow::bail!(
            "Failed to persist entry {} in cache '{}' (see logs)",
            sha,
            cache.name()
        );
    }

    if json {
        let output = SetOutput {
            cache: cache.name(),
            sha: &sha,
            stored: true,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("{} Stored {} in cache '{}'", hoard_prefix(), sha, cache.name());
    }

    Ok(())
}

/// Remove the entry for a key
pub async fn delete(
    workspace: &Workspace,
    target: &CacheTarget,
    key: &KeyArgs,
    json: bool,
) -> Result<()> {
    let cache = open(workspace, target)?;
    let key_value = parse_key(key)?;
    let sha = cache.get_sha(&key_value)?;
    let deleted = cache.remove(&key_value).await?;

    if json {
        let output = DeleteOutput {
            cache: cache.name(),
            sha: &sha,
            deleted,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else if deleted {
        println!("{} Deleted {} from cache '{}'", hoard_prefix(), sha, cache.name());
    } else {
        println!("{} Key not found in cache '{}': {}", hoard_prefix(), cache.name(), key.key);
    }

    Ok(())
}

/// List every entry of a cache
pub async fn list(workspace: &Workspace, target: &CacheTarget, json: bool) -> Result<()> {
    let cache = open(workspace, target)?;
    let entries = cache.entries().await;

    if json {
        println!("{}", serde_json::to_string(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No entries in cache '{}'.", cache.name());
        return Ok(());
    }

    println!("Cache '{}' ({} entries):", cache.name(), entries.len());
    for entry in &entries {
        match &entry.key {
            Some(key) => println!("  {}  {} => {}", entry.sha, key, entry.val),
            None => println!("  {}  {}", entry.sha, entry.val),
        }
    }

    Ok(())
}

/// Print the digest a key maps to
pub fn sha(workspace: &Workspace, key: &KeyArgs) -> Result<()> {
    let key_value = parse_key(key)?;
    let digest = hasher::digest(&key_value, &workspace.config().hash_options())?;
    println!("{}", digest);
    Ok(())
}

/// Delete on-disk cache data
pub async fn clear(workspace: &Workspace, name: Option<&str>, json: bool) -> Result<()> {
    let removed = workspace
        .registry()
        .clear(name)
        .await
        .context("Failed to clear cache")?;

    if json {
        let output = ClearOutput {
            removed: removed.iter().map(|p| p.display().to_string()).collect(),
        };
        println!("{}", serde_json::to_string(&output)?);
    } else if removed.is_empty() {
        println!("{} Nothing to clear.", hoard_prefix());
    } else {
        for path in &removed {
            println!("{} Removed {}", hoard_prefix(), path.display());
        }
    }

    Ok(())
}
