// src/error.rs
//! Public error type for the entire crate

use thiserror::Error;

use crate::aliases::RowId;
use crate::ledger::OperationStatus;

#[derive(Error, Debug)]
pub enum RekeyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Refusing to run: explicit confirmation flag was not given")]
    ConfirmationRequired,

    #[error("Backup failed: {0}")]
    Backup(String),

    /// Neither key opens the value. Requires DBA intervention.
    #[error(
        "Undecryptable field {table}.{field} (id={id}): neither key decrypts it, manual intervention required"
    )]
    Undecryptable {
        table: &'static str,
        field: &'static str,
        id: RowId,
    },

    #[error("Crypto operation failed: {0}")]
    Crypto(String),

    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    #[error("Operation already exists: {0}")]
    DuplicateOperation(String),

    #[error("Invalid ledger transition for {operation_id}: {from} -> {to}")]
    InvalidTransition {
        operation_id: String,
        from: OperationStatus,
        to: OperationStatus,
    },

    #[error("Database error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RekeyError {
    /// True for errors raised before any data could have been touched.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            RekeyError::Config(_) | RekeyError::ConfirmationRequired | RekeyError::Toml(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RekeyError>;
