// src/config/app.rs
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::defaults::*;
use crate::consts::DEFAULT_CONFIG_PATH;
use crate::error::{RekeyError, Result};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseSettings,
    pub backup: BackupSettings,
    pub logging: LoggingSettings,
    pub batch: BatchSettings,

    /// Where this config came from; `None` means built-in defaults
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
    /// SQLCipher passphrase; `None` for an unencrypted database file
    pub key: Option<String>,
}

impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("path", &self.path)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackupMethod {
    /// SQLite online backup API
    #[default]
    Online,
    /// External export tool, stdout captured to the artifact
    Dump,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    pub dir: PathBuf,
    pub method: BackupMethod,
    pub command: String,
    /// `{db}` is replaced by the database path
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub dir: PathBuf,
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub page_size: usize,
}

impl Config {
    /// Parse a TOML file. Missing sections fall back to defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut conf: Config = toml::from_str(&content)?;
        conf.source = Some(path.to_path_buf());
        conf.validate()?;
        Ok(conf)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch.page_size == 0 {
            return Err(RekeyError::Config("batch.page_size must be positive".into()));
        }
        if self.backup.method == BackupMethod::Dump && self.backup.command.trim().is_empty() {
            return Err(RekeyError::Config(
                "backup.command is required when backup.method = \"dump\"".into(),
            ));
        }
        Ok(())
    }

    /// Env vars win over file values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = env::var(ENV_DB) {
            self.database.path = PathBuf::from(path);
        }
        if let Ok(key) = env::var(ENV_DB_KEY) {
            self.database.key = Some(key).filter(|k| !k.is_empty());
        }
        if let Ok(dir) = env::var(ENV_BACKUP_DIR) {
            self.backup.dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var(ENV_LOG_DIR) {
            self.logging.dir = PathBuf::from(dir);
        }
    }
}

/// Resolve config: explicit path, else `PII_REKEY_CONFIG`, else `pii-rekey.toml`,
/// else built-in defaults. Env overrides are applied last.
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => env::var(ENV_CONFIG).ok().map(PathBuf::from),
    };

    let mut conf = match path {
        Some(p) => Config::load_from(&p)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Config::load_from(Path::new(DEFAULT_CONFIG_PATH))?
        }
        None => Config::default(),
    };

    conf.apply_env_overrides();
    conf.validate()?;
    Ok(conf)
}
