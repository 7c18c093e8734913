// src/config/mod.rs
//! Configuration system for pii-rekey
//!
//! TOML file + env overrides, loaded once in `main` and passed down explicitly.

pub use app::{
    load, BackupMethod, BackupSettings, BatchSettings, Config, DatabaseSettings, LoggingSettings,
};
pub use defaults::{ENV_BACKUP_DIR, ENV_CONFIG, ENV_DB, ENV_DB_KEY, ENV_LOG_DIR};

mod app;
mod defaults;
