//! Reactive namespaced state store.
//!
//! A [`Store`] owns one [`Record`] per namespace. Writes shallow-merge into the
//! record, refresh the derived values that depend on the written keys and then
//! notify subscribers, unless a [`Transaction`] is open, in which case both
//! steps wait for the outermost commit.
//!
//! The store is a cheap cloneable handle. Construct one per process and pass
//! it to every consumer.

mod broker;
mod cell;
mod derived;
mod error;
mod persistence;
mod record;
mod transaction;
mod typed;

pub use broker::{Callback, StateChange, SubscribeOptions, SubscriptionId};
pub use cell::StoreCell;
pub use derived::ComputeFn;
pub use error::StoreError;
pub use persistence::{decode_snapshot, encode_snapshot, PersistenceConfig, SNAPSHOT_VERSION};
pub use record::{record_from, Record, Resolved, SetOptions};
pub use transaction::Transaction;
pub use typed::TypedNamespace;

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::config::{Config, StorageBackendKind};
use crate::data::{Database, DatabaseError, MemoryStorage, StorageBackend, StorageType};

use broker::SubscriptionBroker;
use derived::DerivedEngine;
use transaction::TransactionState;

#[derive(Default)]
struct StoreState {
    namespaces: HashMap<String, Record>,
    derived: DerivedEngine,
    broker: SubscriptionBroker,
    tx: TransactionState,
    /// Notifications waiting for delivery, in commit order
    queue: VecDeque<StateChange>,
    /// A delivery loop is running; new notifications queue behind it
    draining: bool,
    /// Internal persistence subscription per namespace
    persistence: HashMap<String, SubscriptionId>,
}

struct Inner {
    state: Mutex<StoreState>,
    backends: HashMap<StorageType, Arc<dyn StorageBackend>>,
}

/// Handle to the state store. Clones share the same state.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

/// Builder for a [`Store`] with explicit storage backends.
#[derive(Default)]
pub struct StoreBuilder {
    backends: HashMap<StorageType, Arc<dyn StorageBackend>>,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `backend` for namespaces persisted with `storage_type`.
    pub fn backend(mut self, storage_type: StorageType, backend: impl StorageBackend + 'static) -> Self {
        self.backends.insert(storage_type, Arc::new(backend));
        self
    }

    pub fn build(mut self) -> Store {
        for storage_type in [StorageType::Local, StorageType::Session] {
            self.backends.entry(storage_type).or_insert_with(|| {
                tracing::debug!(storage = %storage_type, "Using in-memory storage backend");
                Arc::new(MemoryStorage::new())
            });
        }

        Store {
            inner: Arc::new(Inner {
                state: Mutex::new(StoreState::default()),
                backends: self.backends,
            }),
        }
    }
}

impl Store {
    /// Create a store whose storage backends are all in-memory.
    pub fn new() -> Self {
        StoreBuilder::new().build()
    }

    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    /// Create a store wired to the backends named in `config`.
    pub fn from_config(config: &Config) -> Result<Self, DatabaseError> {
        let builder = match config.storage.backend {
            StorageBackendKind::Sqlite => {
                let db = Database::open(config.database_path())?;
                StoreBuilder::new().backend(StorageType::Local, db.snapshots())
            }
            StorageBackendKind::Memory => StoreBuilder::new(),
        };
        Ok(builder.build())
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    /// Full raw record of a namespace. Unknown namespaces read as empty.
    pub fn get_state(&self, namespace: &str) -> Record {
        self.inner
            .state
            .lock()
            .namespaces
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }

    /// Read one key, raw or derived.
    pub fn get(&self, namespace: &str, key: &str) -> Option<Resolved> {
        let st = self.inner.state.lock();
        if let Some(value) = st.derived.get(namespace, key) {
            return Some(Resolved::Derived(value.clone()));
        }
        st.namespaces
            .get(namespace)
            .and_then(|record| record.get(key))
            .map(|value| Resolved::Raw(value.clone()))
    }

    /// Read one key, resolving raw and derived values transparently.
    pub fn get_value(&self, namespace: &str, key: &str) -> Option<Value> {
        self.get(namespace, key).map(Resolved::into_value)
    }

    /// Cached value of one derived definition.
    pub fn get_derived(&self, namespace: &str, name: &str) -> Option<Value> {
        let st = self.inner.state.lock();
        if !st.derived.is_derived(namespace, name) {
            return None;
        }
        st.derived.get(namespace, name).cloned()
    }

    /// Every cached derived value of a namespace.
    pub fn derived_values(&self, namespace: &str) -> Record {
        self.inner.state.lock().derived.values(namespace)
    }

    /// Names of namespaces that currently hold a record, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .state
            .lock()
            .namespaces
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    // ---------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------

    /// Shallow-merge `updates` into a namespace and return the new record.
    pub fn set_state(&self, namespace: &str, mut updates: Record, options: SetOptions) -> Record {
        let snapshot = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;

            st.derived.strip_derived_keys(namespace, &mut updates);
            let changed: BTreeSet<String> = updates.keys().cloned().collect();

            let record = st.namespaces.entry(namespace.to_string()).or_default();
            for (key, value) in updates {
                record.insert(key, value);
            }
            let snapshot = record.clone();

            if changed.is_empty() {
                return snapshot;
            }
            if st.tx.is_open() {
                st.tx.record_write(namespace, &changed, options.silent);
                return snapshot;
            }

            let derived = st.derived.refresh(namespace, &snapshot, &changed);
            if !options.silent {
                st.queue.push_back(StateChange {
                    namespace: namespace.to_string(),
                    changes: pick(&snapshot, &changed),
                    derived,
                    state: snapshot.clone(),
                });
            }
            snapshot
        };

        self.drain();
        snapshot
    }

    /// Replace a namespace's record wholesale.
    ///
    /// Every derived definition of the namespace is recomputed and
    /// subscribers hear about every key present before or after the reset.
    /// Subscriptions survive the reset.
    pub fn reset_state(&self, namespace: &str, mut initial: Record) -> Record {
        {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;

            st.derived.strip_derived_keys(namespace, &mut initial);
            let previous = st
                .namespaces
                .insert(namespace.to_string(), initial.clone())
                .unwrap_or_default();
            let keys: BTreeSet<String> = previous.keys().chain(initial.keys()).cloned().collect();

            if st.tx.is_open() {
                st.tx.record_reset(namespace, keys);
                return initial;
            }

            let derived = st.derived.recompute_all(namespace, &initial);
            if !keys.is_empty() || !derived.is_empty() {
                st.queue.push_back(StateChange {
                    namespace: namespace.to_string(),
                    changes: pick(&initial, &keys),
                    derived,
                    state: initial.clone(),
                });
            }
        }

        self.drain();
        initial
    }

    /// Remove a namespace with its derived definitions, subscriptions and
    /// persistence registration. Returns whether it held a record.
    pub fn drop_namespace(&self, namespace: &str) -> bool {
        let mut st = self.inner.state.lock();
        let existed = st.namespaces.remove(namespace).is_some();
        st.derived.remove_namespace(namespace);
        st.broker.remove_namespace(namespace);
        st.tx.forget(namespace);
        st.persistence.remove(namespace);
        st.queue.retain(|change| change.namespace != namespace);

        tracing::debug!(namespace = %namespace, existed, "Dropped namespace");
        existed
    }

    // ---------------------------------------------------------------
    // Derived state
    // ---------------------------------------------------------------

    /// Register a derived value computed from `dependencies`.
    ///
    /// The initial value is computed immediately. Malformed declarations are
    /// logged and returned as errors; nothing is registered in that case.
    pub fn create_derived_state<I, S, F>(
        &self,
        namespace: &str,
        name: &str,
        dependencies: I,
        compute: F,
    ) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        let dependencies: BTreeSet<String> = dependencies.into_iter().map(Into::into).collect();
        let mut guard = self.inner.state.lock();
        let st = &mut *guard;
        let record = st.namespaces.get(namespace).cloned().unwrap_or_default();

        match st
            .derived
            .register(namespace, name, dependencies, Arc::new(compute), &record)
        {
            Ok(value) => {
                tracing::debug!(namespace = %namespace, name = %name, value = %value, "Registered derived state");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(namespace = %namespace, name = %name, error = %e, "Rejected derived state definition");
                Err(e)
            }
        }
    }

    // ---------------------------------------------------------------
    // Subscriptions
    // ---------------------------------------------------------------

    /// Register a listener on a namespace.
    ///
    /// Callbacks run synchronously, in registration order, after the store
    /// lock is released, so they may read and write the store.
    pub fn subscribe<F>(&self, namespace: &str, callback: F, options: SubscribeOptions) -> SubscriptionId
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.inner
            .state
            .lock()
            .broker
            .add(namespace, options.keys, Arc::new(callback), false)
    }

    /// Remove a registration. Unknown or already removed ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.state.lock().broker.remove(id)
    }

    /// Number of registrations on a namespace, internal ones included.
    pub fn subscriber_count(&self, namespace: &str) -> usize {
        self.inner.state.lock().broker.count(namespace)
    }

    // ---------------------------------------------------------------
    // Transactions
    // ---------------------------------------------------------------

    /// Open a transaction. Writes apply immediately; derived refresh and
    /// notification wait for the outermost commit.
    pub fn start_transaction(&self) -> Transaction {
        let depth = self.inner.state.lock().tx.open();
        tracing::trace!(depth, "Transaction opened");
        Transaction::new(self.clone())
    }

    /// Run `f` inside a transaction and commit it.
    pub fn transaction<R>(&self, f: impl FnOnce(&Store) -> R) -> R {
        let tx = self.start_transaction();
        let result = f(self);
        tx.commit();
        result
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.state.lock().tx.is_open()
    }

    pub(crate) fn end_transaction(&self) {
        {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            let Some(pending) = st.tx.close() else {
                return;
            };

            for ns in pending {
                let Some(record) = st.namespaces.get(&ns.namespace).cloned() else {
                    continue;
                };
                let derived = if ns.reset {
                    st.derived.recompute_all(&ns.namespace, &record)
                } else {
                    st.derived.refresh(&ns.namespace, &record, &ns.changed)
                };
                if ns.notify.is_empty() {
                    continue;
                }
                st.queue.push_back(StateChange {
                    changes: pick(&record, &ns.notify),
                    namespace: ns.namespace,
                    derived,
                    state: record,
                });
            }
        }

        self.drain();
    }

    // ---------------------------------------------------------------
    // Delivery
    // ---------------------------------------------------------------

    /// Deliver queued notifications until the queue is empty.
    ///
    /// Only one loop runs at a time; a notification raised from inside a
    /// callback is queued and delivered after the current one completes.
    fn drain(&self) {
        {
            let mut st = self.inner.state.lock();
            if st.draining {
                return;
            }
            st.draining = true;
        }

        let mut guard = DrainGuard {
            inner: &self.inner,
            armed: true,
        };

        loop {
            let next = {
                let mut st = self.inner.state.lock();
                match st.queue.pop_front() {
                    Some(change) => {
                        let subscribers = st.broker.matching(&change);
                        Some((change, subscribers))
                    }
                    None => {
                        st.draining = false;
                        None
                    }
                }
            };
            let Some((change, subscribers)) = next else {
                break;
            };
            for subscriber in subscribers {
                subscriber.deliver(&change);
            }
        }

        guard.armed = false;
    }
}

/// Resets delivery if a callback panics mid-delivery. Notifications still
/// queued at that point are discarded rather than delivered with a later,
/// unrelated write.
struct DrainGuard<'a> {
    inner: &'a Inner,
    armed: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut st = self.inner.state.lock();
            st.draining = false;
            let discarded = st.queue.len();
            st.queue.clear();
            tracing::error!(discarded, "Subscriber panicked during delivery");
        }
    }
}

/// Values of `keys` in `record`; keys no longer present map to `null`.
fn pick(record: &Record, keys: &BTreeSet<String>) -> Record {
    keys.iter()
        .map(|key| (key.clone(), record.get(key).cloned().unwrap_or(Value::Null)))
        .collect()
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("Store")
            .field("namespaces", &st.namespaces.len())
            .field("in_transaction", &st.tx.is_open())
            .finish()
    }
}
