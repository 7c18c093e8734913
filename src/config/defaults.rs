// src/config/defaults.rs
use std::path::PathBuf;

use crate::config::app::{BackupMethod, BackupSettings, BatchSettings, DatabaseSettings, LoggingSettings};
use crate::consts::DEFAULT_PAGE_SIZE;

pub const ENV_CONFIG: &str = "PII_REKEY_CONFIG";
pub const ENV_DB: &str = "PII_REKEY_DB";
pub const ENV_DB_KEY: &str = "PII_REKEY_DB_KEY";
pub const ENV_BACKUP_DIR: &str = "PII_REKEY_BACKUP_DIR";
pub const ENV_LOG_DIR: &str = "PII_REKEY_LOG_DIR";

pub const DEFAULT_DB_PATH: &str = "data/app.db";
pub const DEFAULT_BACKUP_DIR: &str = "backups";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_DUMP_COMMAND: &str = "sqlite3";

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DB_PATH),
            key: None,
        }
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            method: BackupMethod::Online,
            command: DEFAULT_DUMP_COMMAND.into(),
            args: vec!["{db}".into(), ".dump".into()],
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_LOG_DIR),
            level: DEFAULT_LOG_LEVEL.into(),
        }
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}
