//! Derived state engine.
//!
//! Each namespace owns an ordered list of definitions and a cache of their
//! last computed values. Dependencies are flat: a definition may only read raw
//! keys, never another definition's output.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::Value;

use super::error::StoreError;
use super::record::Record;

/// Pure function from the current record to a derived value.
pub type ComputeFn = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

struct DerivedDefinition {
    name: String,
    dependencies: BTreeSet<String>,
    compute: ComputeFn,
}

impl DerivedDefinition {
    fn depends_on_any(&self, changed: &BTreeSet<String>) -> bool {
        !self.dependencies.is_disjoint(changed)
    }
}

#[derive(Default)]
pub(crate) struct DerivedEngine {
    /// Definitions per namespace, in registration order
    definitions: HashMap<String, Vec<DerivedDefinition>>,
    /// Last computed value per namespace and name
    cache: HashMap<String, Record>,
}

impl DerivedEngine {
    /// Validate, register and compute the initial value of a definition.
    pub(crate) fn register(
        &mut self,
        namespace: &str,
        name: &str,
        dependencies: BTreeSet<String>,
        compute: ComputeFn,
        record: &Record,
    ) -> Result<Value, StoreError> {
        let err_ctx = || (namespace.to_string(), name.to_string());

        if dependencies.is_empty() {
            let (namespace, name) = err_ctx();
            return Err(StoreError::EmptyDependencies { namespace, name });
        }
        if record.contains_key(name) {
            let (namespace, name) = err_ctx();
            return Err(StoreError::NameCollision { namespace, name });
        }

        let existing = self.definitions.get(namespace);
        if existing.is_some_and(|defs| defs.iter().any(|d| d.name == name)) {
            let (namespace, name) = err_ctx();
            return Err(StoreError::DuplicateDerived { namespace, name });
        }
        if dependencies.contains(name) {
            let (namespace, name) = err_ctx();
            return Err(StoreError::ChainedDependency {
                dependency: name.clone(),
                namespace,
                name,
            });
        }
        if let Some(defs) = existing {
            // New definition reading an existing derived value
            if let Some(dep) = defs.iter().find(|d| dependencies.contains(&d.name)) {
                let (namespace, name) = err_ctx();
                return Err(StoreError::ChainedDependency {
                    namespace,
                    name,
                    dependency: dep.name.clone(),
                });
            }
            // Existing definition that would start reading the new one
            if let Some(dep) = defs.iter().find(|d| d.dependencies.contains(name)) {
                let (namespace, _) = err_ctx();
                return Err(StoreError::ChainedDependency {
                    namespace,
                    name: dep.name.clone(),
                    dependency: name.to_string(),
                });
            }
        }

        let value = compute(record);
        self.cache
            .entry(namespace.to_string())
            .or_default()
            .insert(name.to_string(), value.clone());
        self.definitions
            .entry(namespace.to_string())
            .or_default()
            .push(DerivedDefinition {
                name: name.to_string(),
                dependencies,
                compute,
            });

        Ok(value)
    }

    pub(crate) fn is_derived(&self, namespace: &str, name: &str) -> bool {
        self.definitions
            .get(namespace)
            .is_some_and(|defs| defs.iter().any(|d| d.name == name))
    }

    pub(crate) fn get(&self, namespace: &str, name: &str) -> Option<&Value> {
        self.cache.get(namespace).and_then(|cache| cache.get(name))
    }

    /// Snapshot of every cached value in a namespace.
    pub(crate) fn values(&self, namespace: &str) -> Record {
        self.cache.get(namespace).cloned().unwrap_or_default()
    }

    /// Drop keys naming derived values from an incoming write.
    pub(crate) fn strip_derived_keys(&self, namespace: &str, updates: &mut Record) {
        let Some(defs) = self.definitions.get(namespace) else {
            return;
        };
        for def in defs {
            if updates.remove(&def.name).is_some() {
                tracing::warn!(
                    namespace = %namespace,
                    name = %def.name,
                    "Ignoring write to derived state key"
                );
            }
        }
    }

    /// Recompute the definitions whose dependencies intersect `changed`.
    ///
    /// Returns the derived values that actually changed.
    pub(crate) fn refresh(
        &mut self,
        namespace: &str,
        record: &Record,
        changed: &BTreeSet<String>,
    ) -> Record {
        self.recompute(namespace, record, |def| def.depends_on_any(changed))
    }

    /// Recompute every definition of a namespace (used after a reset).
    pub(crate) fn recompute_all(&mut self, namespace: &str, record: &Record) -> Record {
        self.recompute(namespace, record, |_| true)
    }

    fn recompute(
        &mut self,
        namespace: &str,
        record: &Record,
        mut affected: impl FnMut(&DerivedDefinition) -> bool,
    ) -> Record {
        let mut updated = Record::new();
        let Some(defs) = self.definitions.get(namespace) else {
            return updated;
        };
        let cache = self.cache.entry(namespace.to_string()).or_default();

        for def in defs.iter().filter(|d| affected(d)) {
            let value = (def.compute)(record);
            if cache.get(&def.name) != Some(&value) {
                cache.insert(def.name.clone(), value.clone());
                updated.insert(def.name.clone(), value);
            }
        }

        updated
    }

    pub(crate) fn remove_namespace(&mut self, namespace: &str) {
        self.definitions.remove(namespace);
        self.cache.remove(namespace);
    }
}
