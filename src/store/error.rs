//! Store error types.
//!
//! None of these are ever raised as panics. Mutations and reads recover
//! locally; registration helpers log and hand the error back so callers can
//! inspect it or ignore it.

/// Error type for store misuse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store was used through a `StoreCell` before the host installed it.
    #[error("Store has not been initialized")]
    NotInitialized,

    /// A derived definition was declared without dependency keys.
    #[error("Derived state '{name}' in namespace '{namespace}' declares no dependencies")]
    EmptyDependencies { namespace: String, name: String },

    /// A derived name shadows a raw key already present in the record.
    #[error("Derived state '{name}' collides with a raw key in namespace '{namespace}'")]
    NameCollision { namespace: String, name: String },

    /// A derived name was registered twice in the same namespace.
    #[error("Derived state '{name}' is already registered in namespace '{namespace}'")]
    DuplicateDerived { namespace: String, name: String },

    /// A derived definition depends on another derived value.
    #[error(
        "Derived state '{name}' in namespace '{namespace}' would chain through derived '{dependency}'"
    )]
    ChainedDependency {
        namespace: String,
        name: String,
        dependency: String,
    },
}
