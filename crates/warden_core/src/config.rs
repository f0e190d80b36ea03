//! Storage and logging configuration.
//!
//! # Responsibility
//! - Parse and validate the JSON description of one access storage.
//! - Build the matching backend behind `Arc<dyn AccessStorage>`.

use crate::error::AccessError;
use crate::logging::{init_logging, normalize_level};
use crate::storage::memory::MemoryAccessStorage;
use crate::storage::sqlite::SqliteAccessStorage;
use crate::storage::AccessStorage;
use log::info;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

/// Backend selected by `StorageConfig::kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Memory,
    Sqlite,
}

/// Declarative description of one access storage.
///
/// ```json
/// { "name": "local_directory", "kind": "sqlite", "path": "access.db" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Display name; also the `Access(<name>)` log target.
    pub name: String,
    pub kind: StorageKind,
    /// Database file, required for `sqlite`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub readonly: bool,
}

impl StorageConfig {
    pub fn memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: StorageKind::Memory,
            path: None,
            readonly: false,
        }
    }

    pub fn sqlite(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind: StorageKind::Sqlite,
            path: Some(path.into()),
            readonly: false,
        }
    }

    /// Parses and validates a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: StorageConfig =
            serde_json::from_str(json).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        match (self.kind, &self.path) {
            (StorageKind::Sqlite, None) => Err(ConfigError::MissingPath(self.name.clone())),
            (StorageKind::Sqlite, Some(path)) if path.as_os_str().is_empty() => {
                Err(ConfigError::MissingPath(self.name.clone()))
            }
            (StorageKind::Memory, Some(_)) => {
                Err(ConfigError::UnexpectedPath(self.name.clone()))
            }
            _ => Ok(()),
        }
    }
}

/// Level plus absolute directory for `init_logging`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    pub log_dir: PathBuf,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        normalize_level(&self.level).map_err(ConfigError::Logging)?;
        Ok(())
    }

    /// Starts file logging with this configuration.
    pub fn init(&self) -> Result<(), ConfigError> {
        self.validate()?;
        let log_dir = self
            .log_dir
            .to_str()
            .ok_or_else(|| ConfigError::Logging("log_dir must be valid UTF-8".to_string()))?;
        init_logging(&self.level, log_dir).map_err(ConfigError::Logging)
    }
}

fn default_level() -> String {
    crate::logging::default_log_level().to_string()
}

#[derive(Debug)]
pub enum ConfigError {
    Parse(String),
    EmptyName,
    MissingPath(String),
    UnexpectedPath(String),
    Logging(String),
    Open(AccessError),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(message) => write!(f, "invalid storage config: {message}"),
            Self::EmptyName => write!(f, "storage name cannot be empty"),
            Self::MissingPath(name) => write!(f, "sqlite storage `{name}` requires a path"),
            Self::UnexpectedPath(name) => {
                write!(f, "memory storage `{name}` does not take a path")
            }
            Self::Logging(message) => write!(f, "{message}"),
            Self::Open(err) => write!(f, "failed to open storage: {err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Open(err) => Some(err),
            _ => None,
        }
    }
}

impl From<AccessError> for ConfigError {
    fn from(value: AccessError) -> Self {
        Self::Open(value)
    }
}

/// Builds the backend described by `config`.
pub fn open_storage(config: &StorageConfig) -> Result<Arc<dyn AccessStorage>, ConfigError> {
    config.validate()?;
    let storage: Arc<dyn AccessStorage> = match (config.kind, &config.path) {
        (StorageKind::Memory, _) => {
            let storage = MemoryAccessStorage::new(config.name.as_str());
            storage.set_readonly(config.readonly);
            Arc::new(storage)
        }
        (StorageKind::Sqlite, Some(path)) if config.readonly => {
            Arc::new(SqliteAccessStorage::open_readonly(config.name.as_str(), path)?)
        }
        (StorageKind::Sqlite, Some(path)) => {
            Arc::new(SqliteAccessStorage::open(config.name.as_str(), path)?)
        }
        (StorageKind::Sqlite, None) => return Err(ConfigError::MissingPath(config.name.clone())),
    };
    info!(
        target: storage.log_target(),
        "event=storage_config module=config status=ok type={} readonly={}",
        storage.storage_type(),
        storage.is_readonly()
    );
    Ok(storage)
}
