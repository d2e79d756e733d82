//! State records and the value types handed to callers.

use serde_json::Value;

/// One namespace's state: string key to opaque JSON value.
///
/// Reads hand out clones, so mutating a returned record never touches the
/// store.
pub type Record = serde_json::Map<String, Value>;

/// Turn a JSON object into a record.
///
/// Anything other than an object yields an empty record and a warning, which
/// keeps `store.set_state(ns, record_from(json!(..)), ..)` call sites terse.
pub fn record_from(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        Value::Null => Record::new(),
        other => {
            tracing::warn!(value = %other, "Expected a JSON object for a state record");
            Record::new()
        }
    }
}

/// Options accepted by `set_state` and form field setters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Apply the write and refresh derived values without notifying
    /// subscribers (including the persistence adapter).
    pub silent: bool,
}

impl SetOptions {
    pub fn silent() -> Self {
        Self { silent: true }
    }
}

/// A single-key read, tagged with where the value came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// A key written through `set_state`/`reset_state`.
    Raw(Value),
    /// A cached value produced by a derived definition.
    Derived(Value),
}

impl Resolved {
    pub fn value(&self) -> &Value {
        match self {
            Resolved::Raw(v) | Resolved::Derived(v) => v,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Resolved::Raw(v) | Resolved::Derived(v) => v,
        }
    }

    pub fn is_derived(&self) -> bool {
        matches!(self, Resolved::Derived(_))
    }
}
