//! Durable storage backends for namespace snapshots
//!
//! Provides the key-value backend trait, an in-process implementation and a
//! SQLite-backed one.

mod backend;
mod database;
mod memory;
mod migrations;
mod snapshot;

pub use backend::{StorageBackend, StorageError, StorageType};
pub use database::{Database, DatabaseError};
pub use memory::MemoryStorage;
pub use snapshot::SnapshotStore;
