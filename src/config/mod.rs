mod settings;

pub use settings::{
    Config, ConfigError, LoggingConfig, StorageBackendKind, StorageConfig, TomlConfig, EXAMPLE_CONFIG,
};
