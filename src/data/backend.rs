//! Durable key-value backends used by the persistence adapter

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Snapshot encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Lock poisoned")]
    LockPoisoned,
}

/// Which backend a namespace is mirrored to.
///
/// `Local` survives restarts; `Session` only lives as long as the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageType {
    #[default]
    Local,
    Session,
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageType::Local => write!(f, "local"),
            StorageType::Session => write!(f, "session"),
        }
    }
}

/// String-keyed storage the store can snapshot namespaces into.
pub trait StorageBackend: Send + Sync {
    /// Read the raw value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Insert or overwrite the value stored under `key`.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete `key`. Missing keys are not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}
