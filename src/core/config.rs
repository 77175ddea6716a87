//! Store configuration loaded from `<data-dir>/quizbase.toml`.

use crate::core::error::StoreError;
use crate::core::schema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// SQLite file name, relative to the data directory.
    pub database: String,
    pub busy_timeout_secs: u32,
    /// Append one JSON line per committed transaction to `broker.events.jsonl`.
    pub audit_log: bool,
    /// Keep everything in process memory instead of SQLite.
    pub in_memory: bool,
    #[serde(skip)]
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            database: schema::DEFAULT_DB_NAME.to_string(),
            busy_timeout_secs: 5,
            audit_log: false,
            in_memory: false,
            data_dir: PathBuf::from(".quizbase"),
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        StoreConfig {
            in_memory: true,
            ..Default::default()
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database)
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.data_dir.join(schema::AUDIT_LOG_NAME)
    }
}

/// Load `quizbase.toml` from `data_dir`. A missing file yields the defaults.
pub fn load_config(data_dir: &Path) -> Result<StoreConfig, StoreError> {
    let config_path = data_dir.join(schema::CONFIG_FILE_NAME);

    let mut config = if config_path.exists() {
        let content = fs::read_to_string(&config_path)?;
        toml::from_str::<StoreConfig>(&content)
            .map_err(|e| StoreError::Config(format!("{}: {e}", config_path.display())))?
    } else {
        StoreConfig::default()
    };
    config.data_dir = data_dir.to_path_buf();

    if config.database.trim().is_empty() {
        return Err(StoreError::Config("`database` must not be empty".to_string()));
    }
    Ok(config)
}
