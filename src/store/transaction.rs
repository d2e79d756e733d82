//! Transaction coordinator.
//!
//! Transactions are store-wide and reference counted. While one is open,
//! writes land in the records immediately but derived refresh and
//! notification are recorded here and replayed once, per namespace, when the
//! outermost transaction commits.

use std::collections::BTreeSet;

use super::Store;

/// Changes accumulated for one namespace while a transaction is open.
#[derive(Debug, Default)]
pub(crate) struct PendingNamespace {
    pub(crate) namespace: String,
    /// Keys to refresh derived state for (silent writes included).
    pub(crate) changed: BTreeSet<String>,
    /// Keys to report to subscribers.
    pub(crate) notify: BTreeSet<String>,
    /// A reset happened; recompute every definition.
    pub(crate) reset: bool,
}

#[derive(Debug, Default)]
pub(crate) struct TransactionState {
    depth: usize,
    /// Namespaces in the order they were first touched
    pending: Vec<PendingNamespace>,
}

impl TransactionState {
    pub(crate) fn is_open(&self) -> bool {
        self.depth > 0
    }

    pub(crate) fn open(&mut self) -> usize {
        self.depth += 1;
        self.depth
    }

    /// Close one level. Returns the accumulated changes when the outermost
    /// level closes.
    pub(crate) fn close(&mut self) -> Option<Vec<PendingNamespace>> {
        match self.depth {
            0 => {
                tracing::warn!("Transaction closed more times than it was opened");
                None
            }
            1 => {
                self.depth = 0;
                Some(std::mem::take(&mut self.pending))
            }
            _ => {
                self.depth -= 1;
                None
            }
        }
    }

    fn entry(&mut self, namespace: &str) -> &mut PendingNamespace {
        let pos = match self.pending.iter().position(|p| p.namespace == namespace) {
            Some(pos) => pos,
            None => {
                self.pending.push(PendingNamespace {
                    namespace: namespace.to_string(),
                    ..Default::default()
                });
                self.pending.len() - 1
            }
        };
        &mut self.pending[pos]
    }

    pub(crate) fn record_write<'a>(
        &mut self,
        namespace: &str,
        keys: impl IntoIterator<Item = &'a String>,
        silent: bool,
    ) {
        let pending = self.entry(namespace);
        for key in keys {
            pending.changed.insert(key.clone());
            if !silent {
                pending.notify.insert(key.clone());
            }
        }
    }

    pub(crate) fn record_reset(&mut self, namespace: &str, keys: BTreeSet<String>) {
        let pending = self.entry(namespace);
        pending.reset = true;
        pending.changed.extend(keys.iter().cloned());
        pending.notify.extend(keys);
    }

    pub(crate) fn forget(&mut self, namespace: &str) {
        self.pending.retain(|p| p.namespace != namespace);
    }
}

/// An open transaction. Call [`Transaction::commit`] to close it.
///
/// Nested transactions are absorbed by the outermost one; only the outermost
/// commit notifies. A guard dropped without committing is committed then.
#[must_use = "notifications stay suspended until the transaction is committed"]
pub struct Transaction {
    store: Store,
    finished: bool,
}

impl Transaction {
    pub(crate) fn new(store: Store) -> Self {
        Self {
            store,
            finished: false,
        }
    }

    /// Close this transaction level, delivering batched notifications if it
    /// was the outermost one.
    pub fn commit(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.store.end_transaction();
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!("Transaction dropped without commit; committing");
            self.finish();
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("finished", &self.finished)
            .finish()
    }
}
