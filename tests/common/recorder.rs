//! Subscriber that records every change it receives

use std::sync::Arc;

use parking_lot::Mutex;
use statehub::{StateChange, Store, SubscribeOptions, SubscriptionId};

#[derive(Clone, Default)]
pub struct ChangeRecorder {
    seen: Arc<Mutex<Vec<StateChange>>>,
}

impl ChangeRecorder {
    /// Subscribe a new recorder to `namespace`.
    pub fn attach(store: &Store, namespace: &str, options: SubscribeOptions) -> (Self, SubscriptionId) {
        let recorder = Self::default();
        let sink = recorder.seen.clone();
        let id = store.subscribe(namespace, move |change| sink.lock().push(change.clone()), options);
        (recorder, id)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }

    pub fn changes(&self) -> Vec<StateChange> {
        self.seen.lock().clone()
    }

    pub fn last(&self) -> Option<StateChange> {
        self.seen.lock().last().cloned()
    }

    /// Keys reported by each delivered change, raw and derived.
    pub fn keys_per_change(&self) -> Vec<Vec<String>> {
        self.seen
            .lock()
            .iter()
            .map(|change| change.changed_keys().cloned().collect())
            .collect()
    }
}
