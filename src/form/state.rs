//! Form state and field configuration types

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::Record;

/// Checks one field. Receives the field's value and every current value;
/// returns an error message or `None` when the value is acceptable.
pub type Validator = Arc<dyn Fn(&Value, &Record) -> Option<String> + Send + Sync>;

/// Everything a form keeps in its namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormState {
    pub values: Record,
    /// Only fields that currently fail validation appear here.
    pub errors: BTreeMap<String, String>,
    pub touched: BTreeMap<String, bool>,
    /// Whether each value differs from its initial value.
    pub dirty: BTreeMap<String, bool>,
    pub is_submitting: bool,
    pub is_valid: bool,
    pub submit_count: u32,
    pub submit_error: Option<String>,
}

/// One field's slice of a [`FormState`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldState {
    pub value: Value,
    pub error: Option<String>,
    pub touched: bool,
    pub dirty: bool,
}

impl FormState {
    pub fn field(&self, name: &str) -> FieldState {
        FieldState {
            value: self.values.get(name).cloned().unwrap_or(Value::Null),
            error: self.errors.get(name).cloned(),
            touched: self.touched.get(name).copied().unwrap_or(false),
            dirty: self.dirty.get(name).copied().unwrap_or(false),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.values().any(|dirty| *dirty)
    }
}

/// Declaration of one form field.
#[derive(Clone)]
pub struct FieldConfig {
    pub initial_value: Value,
    pub validator: Option<Validator>,
}

impl FieldConfig {
    pub fn new(initial_value: impl Into<Value>) -> Self {
        Self {
            initial_value: initial_value.into(),
            validator: None,
        }
    }

    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value, &Record) -> Option<String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub(crate) fn check(&self, value: &Value, values: &Record) -> Option<String> {
        self.validator.as_ref().and_then(|validate| validate(value, values))
    }
}

impl fmt::Debug for FieldConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldConfig")
            .field("initial_value", &self.initial_value)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

/// How a call to `FormController::submit` ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The handler accepted the values.
    Submitted,
    /// Validation failed; the handler was not called.
    Invalid { errors: BTreeMap<String, String> },
    /// The handler returned an error, also stored in `submit_error`.
    Failed { error: String },
    /// Another submission of the same form is still in flight.
    InProgress,
    /// The form was cleaned up.
    Closed,
}

impl SubmitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SubmitOutcome::Submitted)
    }
}
