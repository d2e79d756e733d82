//! Integration tests for the `statehub` binary

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use statehub::store::decode_snapshot;
use statehub::{record_from, Database, StorageBackend};
use tempfile::TempDir;

fn statehub(data_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("statehub").expect("binary builds");
    cmd.arg("--data-dir").arg(data_dir.path()).env_remove("RUST_LOG");
    cmd
}

/// Set, show, list and remove a snapshot through the binary
#[test]
fn test_cli_round_trip() {
    let dir = TempDir::new().unwrap();

    statehub(&dir)
        .args(["set", "settings", "theme", r#""dark""#])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"theme\": \"dark\""));

    statehub(&dir)
        .args(["set", "settings", "font_size", "14"])
        .assert()
        .success();

    statehub(&dir)
        .args(["show", "settings"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"theme\": \"dark\""))
        .stdout(predicate::str::contains("\"font_size\": 14"));

    statehub(&dir)
        .arg("keys")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("settings\t"));

    statehub(&dir)
        .args(["remove", "settings"])
        .assert()
        .success();

    statehub(&dir)
        .args(["show", "settings"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no snapshot stored under 'settings'"));
}

/// Snapshots written by the binary load through the library
#[test]
fn test_cli_writes_library_envelope() {
    let dir = TempDir::new().unwrap();

    statehub(&dir)
        .args(["set", "prefs", "lang", "fr"])
        .assert()
        .success();

    let db = Database::open(dir.path().join("snapshots.db")).unwrap();
    let raw = db.snapshots().get("prefs").unwrap().unwrap();
    assert_eq!(decode_snapshot(&raw).unwrap(), record_from(json!({"lang": "fr"})));
}

/// First run writes the example config
#[test]
fn test_cli_creates_default_config() {
    let dir = TempDir::new().unwrap();

    statehub(&dir).arg("keys").assert().success();

    assert!(dir.path().join("config.toml").exists());
    assert!(dir.path().join("logs").is_dir());
}

#[test]
fn test_cli_remove_missing_key_fails() {
    let dir = TempDir::new().unwrap();

    statehub(&dir)
        .args(["remove", "ghost"])
        .assert()
        .failure();
}

/// A memory backend keeps nothing to inspect, so snapshot commands refuse to run
#[test]
fn test_cli_rejects_memory_backend() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.toml"), "[storage]\nbackend = \"memory\"\n").unwrap();

    statehub(&dir)
        .args(["set", "k", "f", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("storage backend is \"memory\""));

    assert!(!dir.path().join("snapshots.db").exists());
}

/// The database override in the config file is where snapshots land
#[test]
fn test_cli_uses_configured_database() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "[storage]\nbackend = \"sqlite\"\ndatabase = \"custom.db\"\n",
    )
    .unwrap();

    statehub(&dir)
        .args(["set", "prefs", "lang", "fr"])
        .assert()
        .success();

    assert!(dir.path().join("custom.db").exists());
    assert!(!dir.path().join("snapshots.db").exists());
    let db = Database::open(dir.path().join("custom.db")).unwrap();
    assert!(db.snapshots().get("prefs").unwrap().is_some());
}

/// An unparseable config file falls back to defaults and is logged
#[test]
fn test_cli_logs_invalid_config() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.toml"), "storage = [").unwrap();

    statehub(&dir).arg("keys").assert().success();

    let log = std::fs::read_to_string(dir.path().join("logs").join("statehub.log")).unwrap();
    assert!(log.contains("invalid config file"));
}
