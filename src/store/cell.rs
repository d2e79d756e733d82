//! Initialize-once holder for hosts that wire the store lazily.

use std::sync::OnceLock;

use super::error::StoreError;
use super::Store;

/// A slot the host fills with its [`Store`] during startup.
///
/// Reading an empty cell is a configuration error: it is logged and yields
/// `None` rather than panicking.
#[derive(Debug, Default)]
pub struct StoreCell {
    store: OnceLock<Store>,
}

impl StoreCell {
    pub const fn new() -> Self {
        Self {
            store: OnceLock::new(),
        }
    }

    /// Install the store. Returns `false` if one was already installed.
    pub fn init(&self, store: Store) -> bool {
        let installed = self.store.set(store).is_ok();
        if !installed {
            tracing::debug!("Store already initialized; keeping the existing one");
        }
        installed
    }

    pub fn is_initialized(&self) -> bool {
        self.store.get().is_some()
    }

    pub fn get(&self) -> Option<&Store> {
        let store = self.store.get();
        if store.is_none() {
            tracing::error!(error = %StoreError::NotInitialized, "Store used before initialization");
        }
        store
    }

    /// Run `f` against the installed store.
    pub fn with<R>(&self, f: impl FnOnce(&Store) -> R) -> Option<R> {
        self.get().map(f)
    }
}
