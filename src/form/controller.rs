//! Form controller
//!
//! Each form lives in its own `form:<uuid>` namespace holding a serialized
//! [`FormState`]. Multi-field updates run inside a store transaction so
//! subscribers see one notification per operation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use super::handler::SubmitHandler;
use super::state::{FieldConfig, FormState, SubmitOutcome};
use crate::store::{Record, SetOptions, StateChange, Store, SubscribeOptions, SubscriptionId, TypedNamespace};

/// Create a form in a fresh namespace of `store`.
///
/// Initial values come from each field's config and validation runs once,
/// so `errors` and `is_valid` are meaningful before the first edit.
pub fn create_form<I, S, H>(store: &Store, fields: I, handler: H) -> FormController
where
    I: IntoIterator<Item = (S, FieldConfig)>,
    S: Into<String>,
    H: SubmitHandler + 'static,
{
    let fields: BTreeMap<String, FieldConfig> = fields
        .into_iter()
        .map(|(name, config)| (name.into(), config))
        .collect();
    let namespace = format!("form:{}", Uuid::new_v4());

    let form = FormController {
        state: TypedNamespace::new(store.clone(), namespace),
        fields,
        handler: Arc::new(handler),
        submitting: AtomicBool::new(false),
        closed: AtomicBool::new(false),
        subscriptions: Mutex::new(Vec::new()),
    };
    form.state.replace(&form.initial_state());

    tracing::debug!(
        namespace = %form.namespace(),
        fields = form.fields.len(),
        "Created form"
    );
    form
}

pub struct FormController {
    state: TypedNamespace<FormState>,
    fields: BTreeMap<String, FieldConfig>,
    handler: Arc<dyn SubmitHandler>,
    /// Set while a `submit()` call is in flight
    submitting: AtomicBool,
    closed: AtomicBool,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl FormController {
    pub fn namespace(&self) -> &str {
        self.state.namespace()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self, operation: &str) -> bool {
        if self.is_closed() {
            tracing::warn!(
                namespace = %self.namespace(),
                operation,
                "Form used after cleanup"
            );
            return false;
        }
        true
    }

    fn store(&self) -> &Store {
        self.state.store()
    }

    fn initial_state(&self) -> FormState {
        let mut state = FormState::default();
        for (name, config) in &self.fields {
            state.values.insert(name.clone(), config.initial_value.clone());
            state.touched.insert(name.clone(), false);
            state.dirty.insert(name.clone(), false);
        }
        state.errors = self.compute_errors(&state.values);
        state.is_valid = state.errors.is_empty();
        state
    }

    fn compute_errors(&self, values: &Record) -> BTreeMap<String, String> {
        self.fields
            .iter()
            .filter_map(|(name, config)| {
                let value = values.get(name).unwrap_or(&Value::Null);
                config.check(value, values).map(|error| (name.clone(), error))
            })
            .collect()
    }

    pub fn get_state(&self) -> FormState {
        if !self.ensure_open("get_state") {
            return FormState::default();
        }
        self.state.get()
    }

    /// Apply values to known fields; returns how many were applied.
    fn apply_values(&self, values: Record, options: SetOptions) -> usize {
        let known: Record = values
            .into_iter()
            .filter(|(name, _)| {
                let known = self.fields.contains_key(name);
                if !known {
                    tracing::warn!(namespace = %self.namespace(), field = %name, "Ignoring unknown form field");
                }
                known
            })
            .collect();
        if known.is_empty() {
            return 0;
        }

        self.state.update_with(options, |state| {
            for (name, value) in &known {
                let dirty = self
                    .fields
                    .get(name)
                    .is_some_and(|config| config.initial_value != *value);
                state.values.insert(name.clone(), value.clone());
                state.dirty.insert(name.clone(), dirty);
            }
        });
        known.len()
    }

    /// Set one field. Unless `options.silent`, the form is re-validated.
    pub fn set_field_value(&self, field: &str, value: impl Into<Value>, options: SetOptions) {
        if !self.ensure_open("set_field_value") {
            return;
        }
        let mut values = Record::new();
        values.insert(field.to_string(), value.into());

        self.store().transaction(|_| {
            if self.apply_values(values, options) > 0 && !options.silent {
                self.validate();
            }
        });
    }

    /// Set several fields at once and re-validate.
    pub fn set_values(&self, values: Record) {
        if !self.ensure_open("set_values") {
            return;
        }
        self.store().transaction(|_| {
            if self.apply_values(values, SetOptions::default()) > 0 {
                self.validate();
            }
        });
    }

    pub fn touch_field(&self, field: &str) {
        if !self.ensure_open("touch_field") {
            return;
        }
        if !self.fields.contains_key(field) {
            tracing::warn!(namespace = %self.namespace(), field = %field, "Ignoring unknown form field");
            return;
        }
        self.state.update(|state| {
            state.touched.insert(field.to_string(), true);
        });
    }

    /// Run every validator against the current values.
    pub fn validate(&self) -> bool {
        if !self.ensure_open("validate") {
            return false;
        }
        let values = self.state.get().values;
        let errors = self.compute_errors(&values);
        let is_valid = errors.is_empty();

        self.state.update(|state| {
            state.errors = errors;
            state.is_valid = is_valid;
        });
        is_valid
    }

    /// Return to the initial values, clearing touched, dirty and submission
    /// state. Subscriptions are kept.
    pub fn reset(&self) {
        if !self.ensure_open("reset") {
            return;
        }
        self.state.replace(&self.initial_state());
    }

    /// Validate and hand the values to the submit handler.
    pub async fn submit(&self) -> SubmitOutcome {
        if !self.ensure_open("submit") {
            return SubmitOutcome::Closed;
        }
        if self.submitting.swap(true, Ordering::SeqCst) {
            tracing::debug!(namespace = %self.namespace(), "Submit already in progress");
            return SubmitOutcome::InProgress;
        }
        let _guard = SubmitGuard { form: self };

        let errors = self.store().transaction(|_| {
            self.state.update(|state| state.submit_count += 1);
            if self.validate() {
                return None;
            }
            let state = self.state.update(|state| {
                for name in self.fields.keys() {
                    state.touched.insert(name.clone(), true);
                }
            });
            Some(state.errors)
        });
        if let Some(errors) = errors {
            tracing::debug!(namespace = %self.namespace(), errors = errors.len(), "Submit blocked by validation");
            return SubmitOutcome::Invalid { errors };
        }

        let values = self
            .state
            .update(|state| {
                state.is_submitting = true;
                state.submit_error = None;
            })
            .values;

        let result = self.handler.submit(values).await;
        if self.is_closed() {
            return match result {
                Ok(()) => SubmitOutcome::Submitted,
                Err(e) => SubmitOutcome::Failed {
                    error: format!("{e:#}"),
                },
            };
        }

        match result {
            Ok(()) => {
                self.state.update(|state| state.is_submitting = false);
                SubmitOutcome::Submitted
            }
            Err(e) => {
                let error = format!("{e:#}");
                tracing::warn!(namespace = %self.namespace(), error = %error, "Form submission failed");
                self.state.update(|state| {
                    state.is_submitting = false;
                    state.submit_error = Some(error.clone());
                });
                SubmitOutcome::Failed { error }
            }
        }
    }

    /// Listen to every change of the form state.
    pub fn subscribe<F>(&self, callback: F) -> Option<SubscriptionId>
    where
        F: Fn(&FormState) + Send + Sync + 'static,
    {
        if !self.ensure_open("subscribe") {
            return None;
        }
        let id = self.state.subscribe(
            move |state: &FormState, _: &StateChange| callback(state),
            SubscribeOptions::default(),
        );
        self.subscriptions.lock().push(id);
        Some(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.lock().retain(|existing| *existing != id);
        self.store().unsubscribe(id)
    }

    /// Discard the namespace and every subscription made through this form.
    pub fn cleanup(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            tracing::warn!(namespace = %self.namespace(), "Form already cleaned up");
            return;
        }
        self.subscriptions.lock().clear();
        self.store().drop_namespace(self.namespace());
        tracing::debug!(namespace = %self.namespace(), "Cleaned up form");
    }
}

impl std::fmt::Debug for FormController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormController")
            .field("namespace", &self.namespace())
            .field("fields", &self.fields)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Releases the submit slot, including when the submit future is dropped
/// while the handler is pending.
struct SubmitGuard<'a> {
    form: &'a FormController,
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        if !self.form.is_closed() && self.form.state.get().is_submitting {
            self.form.state.update(|state| state.is_submitting = false);
        }
        self.form.submitting.store(false, Ordering::SeqCst);
    }
}
