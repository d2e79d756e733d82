//! Form controller built on the state store.
//!
//! A form keeps values, validation errors, touched/dirty flags and the
//! submission lifecycle in its own namespace, so any store subscriber can
//! render it.

mod controller;
mod handler;
mod state;

pub use controller::{create_form, FormController};
pub use handler::{submit_fn, FnHandler, NoopHandler, SubmitHandler};
pub use state::{FieldConfig, FieldState, FormState, SubmitOutcome, Validator};
