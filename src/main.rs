use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use statehub::store::decode_snapshot;
use statehub::config::StorageBackendKind;
use statehub::{util, Config, Database, PersistenceConfig, Record, SetOptions, StorageBackend, Store};

/// Inspect and edit persisted state snapshots
#[derive(Parser)]
#[command(name = "statehub")]
#[command(about = "Inspect persisted statehub snapshots", long_about = None)]
#[command(version)]
struct Cli {
    /// Data directory (defaults to ~/.statehub)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored snapshot keys, most recently updated first
    Keys,

    /// Print the state stored under a key
    Show { key: String },

    /// Set one field of a stored snapshot to a JSON value
    Set {
        key: String,
        field: String,
        /// JSON value; anything that does not parse is stored as a string
        value: String,
    },

    /// Delete a stored snapshot
    Remove { key: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    util::init_data_dir(cli.data_dir);

    let (config, config_problems) = Config::load();

    // Initialize logging to file (~/.statehub/logs/statehub.log)
    fs::create_dir_all(util::logs_dir())?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(util::log_file_path())?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(log_file)
        .with_ansi(false) // Disable ANSI colors in log file
        .init();

    for problem in &config_problems {
        tracing::warn!(error = %problem, "Config problem; using defaults");
    }

    // An in-memory backend keeps nothing between runs, so there is nothing to inspect
    if config.storage.backend == StorageBackendKind::Memory {
        anyhow::bail!(
            "storage backend is \"memory\"; snapshots are only kept with backend = \"sqlite\" ({})",
            util::config_path().display()
        );
    }

    let db = Database::open(config.database_path())
        .with_context(|| format!("opening {}", config.database_path().display()))?;
    let snapshots = db.snapshots();

    match cli.command {
        Commands::Keys => {
            for key in snapshots.keys()? {
                let updated_at = snapshots.updated_at(&key)?.unwrap_or_default();
                println!("{key}\t{updated_at}");
            }
        }
        Commands::Show { key } => {
            let raw = snapshots
                .get(&key)?
                .with_context(|| format!("no snapshot stored under '{key}'"))?;
            let state = decode_snapshot(&raw)?;
            println!("{}", serde_json::to_string_pretty(&Value::Object(state))?);
        }
        Commands::Set { key, field, value } => {
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));

            // Go through a store so the write uses the same envelope as a host
            let store = Store::from_config(&config)
                .with_context(|| format!("opening {}", config.database_path().display()))?;
            store.configure_persistence(&key, PersistenceConfig::new(&key));

            let mut updates = Record::new();
            updates.insert(field, value);
            let state = store.set_state(&key, updates, SetOptions::default());
            println!("{}", serde_json::to_string_pretty(&Value::Object(state))?);
        }
        Commands::Remove { key } => {
            if snapshots.get(&key)?.is_none() {
                anyhow::bail!("no snapshot stored under '{key}'");
            }
            snapshots.remove(&key)?;
            println!("removed {key}");
        }
    }

    Ok(())
}
