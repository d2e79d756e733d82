//! Integration tests for persisting namespaces and restoring them after a
//! restart.

use super::common::fixtures::{store_on_disk, temp_database};
use serde_json::json;
use statehub::store::decode_snapshot;
use statehub::{
    record_from, MemoryStorage, PersistenceConfig, SetOptions, StorageBackend, StorageType,
    StoreBuilder,
};
use tempfile::TempDir;

/// A namespace written before a restart is restored on the next start
#[test]
fn test_sqlite_snapshot_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = PersistenceConfig::new("settings").exclude(["session_token"]);

    {
        let (store, _) = store_on_disk(&dir);
        store.configure_persistence("settings", config.clone());
        store.set_state(
            "settings",
            record_from(json!({"theme": "dark", "session_token": "abc"})),
            SetOptions::default(),
        );
    }

    let (store, snapshots) = store_on_disk(&dir);
    store.set_state("settings", record_from(json!({"theme": "light", "font_size": 14})), SetOptions::default());
    store.configure_persistence("settings", config);

    assert_eq!(
        store.get_state("settings"),
        record_from(json!({"theme": "dark", "font_size": 14}))
    );
    assert_eq!(snapshots.keys().unwrap(), vec!["settings".to_string()]);
}

/// Excluded keys never reach storage
#[test]
fn test_excluded_keys_are_not_written() {
    let (db, _dir) = temp_database();
    let snapshots = db.snapshots();
    let store = StoreBuilder::new()
        .backend(StorageType::Local, snapshots.clone())
        .build();
    store.configure_persistence("auth", PersistenceConfig::new("auth").exclude(["password"]));

    store.set_state(
        "auth",
        record_from(json!({"user": "ada", "password": "hunter2"})),
        SetOptions::default(),
    );

    let raw = snapshots.get("auth").unwrap().unwrap();
    assert!(!raw.contains("hunter2"));
    assert_eq!(decode_snapshot(&raw).unwrap(), record_from(json!({"user": "ada"})));
}

/// Session storage lives as long as its backend instance
#[test]
fn test_session_storage_round_trip() {
    let session = MemoryStorage::new();
    let config = PersistenceConfig::new("panel").storage_type(StorageType::Session);

    let first = StoreBuilder::new()
        .backend(StorageType::Session, session.clone())
        .build();
    first.configure_persistence("panel", config.clone());
    first.set_state("panel", record_from(json!({"open": true})), SetOptions::default());
    assert_eq!(session.keys(), vec!["panel".to_string()]);

    let second = StoreBuilder::new()
        .backend(StorageType::Session, session.clone())
        .build();
    second.configure_persistence("panel", config.clone());
    assert_eq!(second.get_value("panel", "open"), Some(json!(true)));

    let fresh = StoreBuilder::new()
        .backend(StorageType::Session, MemoryStorage::new())
        .build();
    fresh.configure_persistence("panel", config);
    assert!(fresh.get_state("panel").is_empty());
}

/// A corrupt snapshot is ignored and overwritten by the next write
#[test]
fn test_corrupt_snapshot_is_ignored() {
    let storage = MemoryStorage::new();
    storage.set("prefs", "{not json").unwrap();

    let store = StoreBuilder::new()
        .backend(StorageType::Local, storage.clone())
        .build();
    store.set_state("prefs", record_from(json!({"lang": "en"})), SetOptions::default());
    store.configure_persistence("prefs", PersistenceConfig::new("prefs"));
    assert_eq!(store.get_state("prefs"), record_from(json!({"lang": "en"})));

    store.set_state("prefs", record_from(json!({"lang": "fr"})), SetOptions::default());
    let saved = decode_snapshot(&storage.get("prefs").unwrap().unwrap()).unwrap();
    assert_eq!(saved, record_from(json!({"lang": "fr"})));
}

/// Writes inside a transaction are persisted once, at commit
#[test]
fn test_transaction_persists_final_state() {
    let storage = MemoryStorage::new();
    let store = StoreBuilder::new()
        .backend(StorageType::Local, storage.clone())
        .build();
    store.configure_persistence("ns", PersistenceConfig::new("ns"));

    store.transaction(|store| {
        store.set_state("ns", record_from(json!({"a": 1})), SetOptions::default());
        assert!(storage.get("ns").unwrap().is_none());
        store.set_state("ns", record_from(json!({"b": 2})), SetOptions::default());
    });

    let saved = decode_snapshot(&storage.get("ns").unwrap().unwrap()).unwrap();
    assert_eq!(saved, record_from(json!({"a": 1, "b": 2})));
}
