//! Logger configuration loaded from JSON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{
    persist::{SharedStore, StoreError, memory::MemoryStore, shared, sqlite::SqliteStore},
    runtime::writer::WriterConfig,
};

/// Why configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid configuration JSON.
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level settings. Every field has a default, so `{}` is a valid file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Collection holding action records.
    pub collection: String,
    /// SQLite database file; an in-memory store is used when unset.
    pub database_path: Option<PathBuf>,
    /// Batch writer tuning.
    pub writer: WriterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collection: "actions".to_string(),
            database_path: None,
            writer: WriterConfig::default(),
        }
    }
}

impl Config {
    /// Reads a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Parses JSON config text.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Opens the configured store.
    pub fn open_store(&self) -> Result<SharedStore, StoreError> {
        match &self.database_path {
            Some(path) => {
                info!(path = %path.display(), "opening sqlite action store");
                Ok(shared(SqliteStore::open(path)?))
            }
            None => {
                info!("using in-memory action store");
                Ok(shared(MemoryStore::new()))
            }
        }
    }
}
