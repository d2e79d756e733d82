//! Subscription broker.
//!
//! Subscribers are kept per namespace in registration order. The broker only
//! selects who should hear about a change; the store invokes the callbacks
//! after releasing its lock.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::record::Record;

/// Stable handle for a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What a subscriber receives for one mutation or one committed transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub namespace: String,
    /// Raw keys written, with their value after the mutation.
    /// Keys removed by a reset carry `null`.
    pub changes: Record,
    /// Derived values whose cached result changed.
    pub derived: Record,
    /// Full raw record after the mutation.
    pub state: Record,
}

impl StateChange {
    /// Every key this change touched, raw and derived.
    pub fn changed_keys(&self) -> impl Iterator<Item = &String> {
        self.changes.keys().chain(self.derived.keys())
    }

    pub fn touches(&self, keys: &BTreeSet<String>) -> bool {
        self.changed_keys().any(|k| keys.contains(k))
    }
}

pub type Callback = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// Options for `Store::subscribe`.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Only fire when one of these keys changes.
    pub keys: Option<BTreeSet<String>>,
}

impl SubscribeOptions {
    pub fn keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: Some(keys.into_iter().map(Into::into).collect()),
        }
    }
}

pub(crate) struct Subscriber {
    pub(crate) id: SubscriptionId,
    keys: Option<BTreeSet<String>>,
    callback: Callback,
    active: AtomicBool,
    internal: bool,
}

impl Subscriber {
    fn wants(&self, change: &StateChange) -> bool {
        match &self.keys {
            Some(keys) => change.touches(keys),
            None => true,
        }
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Invoke the callback unless the registration was removed meanwhile.
    pub(crate) fn deliver(&self, change: &StateChange) {
        if self.active.load(Ordering::SeqCst) {
            (self.callback)(change);
        }
    }
}

#[derive(Default)]
pub(crate) struct SubscriptionBroker {
    next_id: u64,
    by_namespace: HashMap<String, Vec<Arc<Subscriber>>>,
    index: HashMap<SubscriptionId, String>,
}

impl SubscriptionBroker {
    pub(crate) fn add(
        &mut self,
        namespace: &str,
        keys: Option<BTreeSet<String>>,
        callback: Callback,
        internal: bool,
    ) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.by_namespace
            .entry(namespace.to_string())
            .or_default()
            .push(Arc::new(Subscriber {
                id,
                keys,
                callback,
                active: AtomicBool::new(true),
                internal,
            }));
        self.index.insert(id, namespace.to_string());
        id
    }

    /// Remove a caller-owned registration. Internal ones are left alone.
    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        let Some(namespace) = self.index.get(&id) else {
            return false;
        };
        let Some(subs) = self.by_namespace.get(namespace) else {
            return false;
        };
        if subs.iter().any(|s| s.id == id && s.internal) {
            tracing::warn!(subscription = %id, "Refusing to remove internal subscription");
            return false;
        }
        self.remove_any(id)
    }

    /// Remove any registration, internal ones included.
    pub(crate) fn remove_any(&mut self, id: SubscriptionId) -> bool {
        let Some(namespace) = self.index.remove(&id) else {
            return false;
        };
        if let Some(subs) = self.by_namespace.get_mut(&namespace) {
            if let Some(pos) = subs.iter().position(|s| s.id == id) {
                subs.remove(pos).deactivate();
            }
            if subs.is_empty() {
                self.by_namespace.remove(&namespace);
            }
        }
        true
    }

    /// Drop every registration of a namespace.
    pub(crate) fn remove_namespace(&mut self, namespace: &str) {
        if let Some(subs) = self.by_namespace.remove(namespace) {
            for sub in subs {
                sub.deactivate();
                self.index.remove(&sub.id);
            }
        }
    }

    /// Subscribers interested in `change`, in registration order.
    pub(crate) fn matching(&self, change: &StateChange) -> Vec<Arc<Subscriber>> {
        self.by_namespace
            .get(&change.namespace)
            .map(|subs| subs.iter().filter(|s| s.wants(change)).cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn count(&self, namespace: &str) -> usize {
        self.by_namespace.get(namespace).map_or(0, Vec::len)
    }
}
