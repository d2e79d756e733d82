//! SQLite-backed snapshot storage (key-value table)

use chrono::Utc;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex, MutexGuard};

use super::backend::{StorageBackend, StorageError};

/// Data access object for persisted namespace snapshots
#[derive(Clone)]
pub struct SnapshotStore {
    conn: Arc<Mutex<Connection>>,
}

impl SnapshotStore {
    /// Create a new SnapshotStore over a shared connection
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// All stored keys, most recently updated first
    pub fn keys(&self) -> Result<Vec<String>, StorageError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT key FROM state_snapshots ORDER BY updated_at DESC, key ASC")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys)
    }

    /// Last write time of a key (RFC 3339)
    pub fn updated_at(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT updated_at FROM state_snapshots WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;

        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    /// Clear all snapshots
    pub fn clear_all(&self) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM state_snapshots", [])?;
        Ok(())
    }
}

impl StorageBackend for SnapshotStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT value FROM state_snapshots WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;

        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO state_snapshots (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM state_snapshots WHERE key = ?1", params![key])?;
        Ok(())
    }
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore").finish_non_exhaustive()
    }
}
