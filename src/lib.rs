pub mod config;
pub mod data;
pub mod form;
pub mod store;
pub mod util;

pub use config::{Config, ConfigError};
pub use data::{Database, MemoryStorage, SnapshotStore, StorageBackend, StorageError, StorageType};
pub use form::{create_form, FieldConfig, FormController, FormState, SubmitHandler, SubmitOutcome};
pub use store::{
    record_from, PersistenceConfig, Record, Resolved, SetOptions, StateChange, Store, StoreBuilder,
    StoreCell, StoreError, SubscribeOptions, SubscriptionId, Transaction, TypedNamespace,
};
