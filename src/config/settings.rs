use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::util::paths::{config_path, data_dir, database_path};

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

/// Application configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Where `Local` persistence snapshots are written
    pub storage: StorageConfig,
    /// Log filter used when `RUST_LOG` is not set
    pub logging: LoggingConfig,
}

/// Backend used for durable (`Local`) persistence
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBackendKind {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    pub backend: StorageBackendKind,
    /// Snapshot database override; relative paths resolve against the data dir
    pub database: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlStorageConfig {
    pub backend: Option<StorageBackendKind>,
    pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlLoggingConfig {
    pub level: Option<String>,
}

/// Problems found while loading the config file. None of them are fatal; the
/// affected settings fall back to their defaults.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to write default config to {}: {source}", path.display())]
    WriteDefault {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub storage: Option<TomlStorageConfig>,
    pub logging: Option<TomlLoggingConfig>,
}

impl Config {
    /// Load configuration from the data directory, merging with defaults.
    ///
    /// Runs before logging is set up, so problems are handed back for the
    /// caller to report instead of being logged here.
    pub fn load() -> (Self, Vec<ConfigError>) {
        let config_file = config_path();
        let mut problems = Vec::new();

        // Create example config on first run
        if !config_file.exists() {
            if let Err(e) = Self::create_default_config(&config_file) {
                problems.push(e);
            }
        }

        let config = match Self::load_from(&config_file) {
            Ok(config) => config,
            Err(e) => {
                problems.push(e);
                Config::default()
            }
        };
        (config, problems)
    }

    /// Load configuration from `path`, merging with defaults.
    /// A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(config),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let toml_config =
            toml::from_str::<TomlConfig>(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if let Some(storage) = toml_config.storage {
            if let Some(backend) = storage.backend {
                config.storage.backend = backend;
            }
            if storage.database.is_some() {
                config.storage.database = storage.database;
            }
        }

        if let Some(logging) = toml_config.logging {
            if let Some(level) = logging.level {
                config.logging.level = level;
            }
        }

        Ok(config)
    }

    /// Create the default config file from the bundled example
    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let write_error = |source| ConfigError::WriteDefault {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(write_error)?;
            }
        }

        fs::write(path, EXAMPLE_CONFIG).map_err(write_error)
    }

    /// Resolved snapshot database path
    pub fn database_path(&self) -> PathBuf {
        match &self.storage.database {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => data_dir().join(path),
            None => database_path(),
        }
    }

    pub fn with_storage_backend(mut self, backend: StorageBackendKind) -> Self {
        self.storage.backend = backend;
        self
    }

    pub fn with_database(mut self, path: PathBuf) -> Self {
        self.storage.database = Some(path);
        self
    }
}
