//! Statically typed view over a namespace.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::broker::{StateChange, SubscribeOptions, SubscriptionId};
use super::record::{Record, SetOptions};
use super::Store;

/// A namespace whose record is the serde form of `T`.
///
/// Reads deserialize the current record, falling back to `T::default()` when
/// it does not fit. Updates diff the top-level fields and write only the ones
/// that changed, so key-filtered subscribers keep working.
pub struct TypedNamespace<T> {
    store: Store,
    namespace: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedNamespace<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            namespace: self.namespace.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for TypedNamespace<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedNamespace")
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl<T> TypedNamespace<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(store: Store, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            _marker: PhantomData,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn get(&self) -> T {
        decode(&self.namespace, &self.store.get_state(&self.namespace))
    }

    /// Mutate the typed value and write back the fields that changed.
    pub fn update<F>(&self, f: F) -> T
    where
        F: FnOnce(&mut T),
    {
        self.update_with(SetOptions::default(), f)
    }

    pub fn update_with<F>(&self, options: SetOptions, f: F) -> T
    where
        F: FnOnce(&mut T),
    {
        let before = self.store.get_state(&self.namespace);
        let mut value: T = decode(&self.namespace, &before);
        f(&mut value);

        let after = match encode(&value) {
            Ok(after) => after,
            Err(e) => {
                tracing::warn!(namespace = %self.namespace, error = %e, "Failed to encode typed state");
                return value;
            }
        };
        let patch: Record = after
            .into_iter()
            .filter(|(key, new)| before.get(key) != Some(new))
            .collect();

        if !patch.is_empty() {
            self.store.set_state(&self.namespace, patch, options);
        }
        value
    }

    /// Replace the whole record with `value`.
    pub fn replace(&self, value: &T) {
        match encode(value) {
            Ok(record) => {
                self.store.reset_state(&self.namespace, record);
            }
            Err(e) => {
                tracing::warn!(namespace = %self.namespace, error = %e, "Failed to encode typed state");
            }
        }
    }

    /// Subscribe with the decoded value alongside the raw change.
    pub fn subscribe<F>(&self, callback: F, options: SubscribeOptions) -> SubscriptionId
    where
        T: 'static,
        F: Fn(&T, &StateChange) + Send + Sync + 'static,
    {
        self.store.subscribe(
            &self.namespace,
            move |change| {
                let value: T = decode(&change.namespace, &change.state);
                callback(&value, change);
            },
            options,
        )
    }
}

fn decode<T: DeserializeOwned + Default>(namespace: &str, record: &Record) -> T {
    serde_json::from_value(Value::Object(record.clone())).unwrap_or_else(|e| {
        tracing::warn!(namespace = %namespace, error = %e, "State does not match typed schema");
        T::default()
    })
}

fn encode<T: Serialize>(value: &T) -> Result<Record, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(serde::ser::Error::custom("typed state must serialize to an object")),
    }
}
