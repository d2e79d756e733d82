//! Persistence adapter.
//!
//! A persisted namespace is restored from its backend once, when persistence
//! is configured, and then mirrored back by an internal subscriber on every
//! non-silent notification. Storage failures never reach the caller; they are
//! logged and the in-memory state stays authoritative.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::broker::StateChange;
use super::record::{Record, SetOptions};
use super::Store;
use crate::data::{StorageBackend, StorageError, StorageType};

/// Envelope version written by [`encode_snapshot`].
pub const SNAPSHOT_VERSION: u32 = 1;

/// How a namespace is mirrored to storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistenceConfig {
    pub storage_type: StorageType,
    pub storage_key: String,
    /// Keys that are never written to storage and ignored on load.
    pub exclude_keys: BTreeSet<String>,
}

impl PersistenceConfig {
    pub fn new(storage_key: impl Into<String>) -> Self {
        Self {
            storage_key: storage_key.into(),
            ..Default::default()
        }
    }

    pub fn storage_type(mut self, storage_type: StorageType) -> Self {
        self.storage_type = storage_type;
        self
    }

    pub fn exclude<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_keys.extend(keys.into_iter().map(Into::into));
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedSnapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    state: Record,
}

/// Serialize `state` minus `exclude` into the snapshot envelope.
pub fn encode_snapshot(state: &Record, exclude: &BTreeSet<String>) -> Result<String, StorageError> {
    let state: Record = state
        .iter()
        .filter(|(key, _)| !exclude.contains(*key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let snapshot = PersistedSnapshot {
        version: SNAPSHOT_VERSION,
        saved_at: Utc::now(),
        state,
    };
    Ok(serde_json::to_string(&snapshot)?)
}

/// Parse a stored snapshot. Accepts the envelope or a bare JSON object.
///
/// An object that looks like an envelope but does not decode as one is read
/// as a bare object.
pub fn decode_snapshot(raw: &str) -> Result<Record, StorageError> {
    let value: Value = serde_json::from_str(raw)?;
    let looks_like_envelope = value
        .as_object()
        .is_some_and(|obj| obj.contains_key("version") && obj.get("state").is_some_and(Value::is_object));

    if looks_like_envelope {
        match PersistedSnapshot::deserialize(&value) {
            Ok(snapshot) => {
                if snapshot.version > SNAPSHOT_VERSION {
                    tracing::warn!(
                        version = snapshot.version,
                        "Snapshot was written by a newer version; loading anyway"
                    );
                }
                return Ok(snapshot.state);
            }
            Err(e) => {
                tracing::debug!(error = %e, "Not a snapshot envelope; reading as a bare object");
            }
        }
    }

    match value {
        Value::Object(map) => Ok(map),
        _ => Err(StorageError::Json(serde::de::Error::custom(
            "snapshot is not a JSON object",
        ))),
    }
}

struct PersistenceAdapter {
    namespace: String,
    backend: Arc<dyn StorageBackend>,
    config: PersistenceConfig,
}

impl PersistenceAdapter {
    /// Read the stored snapshot, if any, without excluded keys.
    fn load(&self) -> Option<Record> {
        let raw = match self.backend.get(&self.config.storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(
                    namespace = %self.namespace,
                    key = %self.config.storage_key,
                    error = %e,
                    "Failed to read persisted state"
                );
                return None;
            }
        };

        match decode_snapshot(&raw) {
            Ok(mut state) => {
                state.retain(|key, _| !self.config.exclude_keys.contains(key));
                Some(state)
            }
            Err(e) => {
                tracing::warn!(
                    namespace = %self.namespace,
                    key = %self.config.storage_key,
                    error = %e,
                    "Ignoring unreadable persisted state"
                );
                None
            }
        }
    }

    fn persist(&self, state: &Record) {
        let result = encode_snapshot(state, &self.config.exclude_keys)
            .and_then(|encoded| self.backend.set(&self.config.storage_key, &encoded));
        if let Err(e) = result {
            tracing::warn!(
                namespace = %self.namespace,
                key = %self.config.storage_key,
                error = %e,
                "Failed to persist state"
            );
        }
    }
}

impl Store {
    /// Mirror a namespace to durable storage.
    ///
    /// Any stored snapshot is merged into the namespace first, so persisted
    /// values win over defaults already written. Configuring the same
    /// namespace again replaces the previous adapter.
    pub fn configure_persistence(&self, namespace: &str, config: PersistenceConfig) {
        let Some(backend) = self.inner.backends.get(&config.storage_type).cloned() else {
            tracing::warn!(
                namespace = %namespace,
                storage = %config.storage_type,
                "No storage backend registered; persistence disabled"
            );
            return;
        };

        let adapter = Arc::new(PersistenceAdapter {
            namespace: namespace.to_string(),
            backend,
            config,
        });

        if let Some(restored) = adapter.load() {
            tracing::debug!(
                namespace = %namespace,
                keys = restored.len(),
                "Restoring persisted state"
            );
            self.set_state(namespace, restored, SetOptions::default());
        }

        let writer = adapter.clone();
        let mut st = self.inner.state.lock();
        let id = st.broker.add(
            namespace,
            None,
            Arc::new(move |change: &StateChange| writer.persist(&change.state)),
            true,
        );
        if let Some(previous) = st.persistence.insert(namespace.to_string(), id) {
            st.broker.remove_any(previous);
            tracing::debug!(namespace = %namespace, "Replaced persistence adapter");
        }

        tracing::info!(
            namespace = %namespace,
            key = %adapter.config.storage_key,
            storage = %adapter.config.storage_type,
            "Persistence configured"
        );
    }

    /// Whether a namespace is mirrored to storage.
    pub fn is_persisted(&self, namespace: &str) -> bool {
        self.inner.state.lock().persistence.contains_key(namespace)
    }
}
