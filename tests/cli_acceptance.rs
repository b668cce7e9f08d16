/// Acceptance tests for the hoard CLI
///
/// Every test runs the binary inside its own temp directory with its own
/// cache root and HOME, so no project or global config is picked up.
use assert_cmd::Command;
use hoard::hasher::{self, HashOptions};
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    fn cache_path(&self) -> std::path::PathBuf {
        self.path().join("cache")
    }

    fn hoard(&self) -> Command {
        let mut cmd = Command::new(std::env!("CARGO_BIN_EXE_hoard"));
        cmd.current_dir(self.path())
            .env("HOME", self.path())
            .env("HOARD_CONFIG_CACHE_DIR", self.cache_path())
            .env_remove("HOARD_CONFIG")
            .env_remove("HOARD_CONFIG_BACKEND")
            .env_remove("RUST_LOG");
        cmd
    }

    fn set(&self, args: &[&str]) {
        self.hoard().arg("set").args(args).assert().success();
    }
}

fn sha(key: &str) -> String {
    hasher::digest(key, &HashOptions::default())
        .unwrap()
        .to_string()
}

#[test]
fn test_set_then_get_string() {
    let ws = TestWorkspace::new();

    ws.hoard()
        .args(["set", "docs", "greeting", "hello world"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[hoard] Stored"));

    ws.hoard()
        .args(["get", "docs", "greeting"])
        .assert()
        .success()
        .stdout("hello world\n");
}

#[test]
fn test_get_json_output() {
    let ws = TestWorkspace::new();
    ws.set(&["docs", "answer", r#"{"text":"42","tokens":3}"#]);

    let output = ws
        .hoard()
        .args(["get", "docs", "answer", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed["found"], true);
    assert_eq!(parsed["sha"], sha("answer"));
    assert_eq!(parsed["value"]["tokens"], 3);
}

#[test]
fn test_get_missing_key_fails() {
    let ws = TestWorkspace::new();

    ws.hoard()
        .args(["get", "docs", "absent"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Key not found"));
}

#[test]
fn test_jsonl_layout_on_disk() {
    let ws = TestWorkspace::new();
    ws.set(&["my-docs", "k", "1"]);

    let log = fs::read_to_string(ws.cache_path().join("my_docs").join("db.jsonl")).unwrap();
    assert_eq!(log, format!("{{\"sha\":\"{}\",\"key\":\"k\",\"val\":1}}\n", sha("k")));
}

#[test]
fn test_repeated_identical_set_appends_once() {
    let ws = TestWorkspace::new();
    ws.set(&["docs", "k", "1"]);
    ws.set(&["docs", "k", "1"]);
    ws.set(&["docs", "k", "2"]);

    let log = fs::read_to_string(ws.cache_path().join("docs").join("db.jsonl")).unwrap();
    assert_eq!(log.lines().count(), 2);

    ws.hoard()
        .args(["get", "docs", "k"])
        .assert()
        .success()
        .stdout("2\n");
}

#[test]
fn test_directory_backend() {
    let ws = TestWorkspace::new();
    ws.set(&["pages", "k", r#"{"a":1}"#, "--backend", "directory"]);

    let entry = ws.cache_path().join("pages").join(format!("{}.json", sha("k")));
    assert_eq!(fs::read_to_string(entry).unwrap(), "{\n  \"a\": 1\n}");

    ws.hoard()
        .args(["list", "pages", "--backend", "directory", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(sha("k")));

    // Separate from the log-backed cache of the same name
    ws.hoard()
        .args(["get", "pages", "k"])
        .assert()
        .failure();
}

#[test]
fn test_json_keys_are_canonical() {
    let ws = TestWorkspace::new();
    ws.set(&["docs", r#"{"b":2,"a":1}"#, "v", "--json-key"]);

    ws.hoard()
        .args(["get", "docs", r#"{"a":1,"b":2}"#, "--json-key"])
        .assert()
        .success()
        .stdout("v\n");
}

#[test]
fn test_sha_command() {
    let ws = TestWorkspace::new();

    ws.hoard()
        .args(["sha", "prompt"])
        .assert()
        .success()
        .stdout(format!("{}\n", sha("prompt")));
}

#[test]
fn test_delete() {
    let ws = TestWorkspace::new();
    ws.set(&["docs", "k", "1"]);

    ws.hoard()
        .args(["delete", "docs", "k", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""deleted":true"#));

    ws.hoard().args(["get", "docs", "k"]).assert().failure();

    ws.hoard()
        .args(["delete", "docs", "k"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Key not found"));
}

#[test]
fn test_list() {
    let ws = TestWorkspace::new();

    ws.hoard()
        .args(["list", "docs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No entries"));

    ws.set(&["docs", "a", "1"]);
    ws.set(&["docs", "b", "2"]);

    ws.hoard()
        .args(["list", "docs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 entries"))
        .stdout(predicate::str::contains(sha("a")));
}

#[test]
fn test_clear_named_cache() {
    let ws = TestWorkspace::new();
    ws.set(&["one", "k", "1"]);
    ws.set(&["two", "k", "2"]);

    ws.hoard().args(["clear", "one"]).assert().success();

    assert!(!ws.cache_path().join("one").exists());
    assert!(ws.cache_path().join("two").exists());

    ws.hoard().args(["clear"]).assert().success();
    assert!(!ws.cache_path().exists());

    ws.hoard()
        .args(["clear"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to clear"));
}

#[test]
fn test_blob_dedup() {
    let ws = TestWorkspace::new();
    let file = ws.path().join("image.png");
    fs::write(&file, b"\x89PNG\r\n\x1a\nrest-of-image").unwrap();
    let file = file.to_str().unwrap();

    let output = ws.hoard().args(["blob", file, "--json"]).output().unwrap();
    assert!(output.status.success());
    let first: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(first["created"], true);
    let path = first["path"].as_str().unwrap().to_string();
    assert!(path.ends_with(".png"));
    assert!(Path::new(&path).starts_with(ws.cache_path().join(".blobs")));

    let output = ws.hoard().args(["blob", file, "--json"]).output().unwrap();
    let second: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(second["created"], false);
    assert_eq!(second["path"], path.as_str());
}

#[test]
fn test_blobs_do_not_mix_with_cache_named_blobs() {
    let ws = TestWorkspace::new();
    let file = ws.path().join("note.txt");
    fs::write(&file, b"some text").unwrap();

    ws.set(&["blobs", "k", "1", "--backend", "directory"]);
    ws.hoard()
        .args(["blob", file.to_str().unwrap()])
        .assert()
        .success();

    let cache_files = fs::read_dir(ws.cache_path().join("blobs")).unwrap().count();
    assert_eq!(cache_files, 1);
    ws.hoard()
        .args(["list", "blobs", "--backend", "directory"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 entries"));
}

#[test]
fn test_blob_rejects_empty_file() {
    let ws = TestWorkspace::new();
    let file = ws.path().join("empty.bin");
    fs::write(&file, b"").unwrap();

    ws.hoard()
        .args(["blob", file.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("empty"));
}

#[test]
fn test_project_config_is_discovered() {
    let ws = TestWorkspace::new();
    fs::write(
        ws.path().join("hoard.toml"),
        "[cache]\nformat_version = \"7\"\ndefault_backend = \"directory\"\n",
    )
    .unwrap();

    let expected = hasher::digest(
        "k",
        &HashOptions {
            salt: "7".to_string(),
            length: 32,
        },
    )
    .unwrap();

    ws.hoard()
        .args(["sha", "k"])
        .assert()
        .success()
        .stdout(format!("{}\n", expected));

    ws.set(&["docs", "k", "1"]);
    assert!(ws
        .cache_path()
        .join("docs")
        .join(format!("{}.json", expected))
        .exists());
}

#[test]
fn test_config_example() {
    let ws = TestWorkspace::new();

    ws.hoard()
        .args(["config", "example"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[cache]"))
        .stdout(predicate::str::contains("default_backend = \"jsonl\""));
}
