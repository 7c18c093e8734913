// src/lib.rs
//! pii-rekey — key rotation and emergency rollback for encrypted PII columns
//!
//! Features:
//! - Compile-time field catalog, parameterized SQL
//! - AES-256-GCM field cipher with dual-key probing
//! - Page-atomic, checkpointed re-encryption over SQLite / SQLCipher
//! - Durable progress ledger + mandatory pre-run backup

pub mod aliases;
pub mod backup;
pub mod catalog;
pub mod cipher;
pub mod config;
pub mod consts;
pub mod db;
pub mod engine;
pub mod error;
pub mod key_ops;
pub mod ledger;
pub mod oplog;
pub mod rollback;
pub mod rotation;
pub mod run;
pub mod walker;

// Re-export everything users need at the crate root
pub use backup::{BackupTrigger, DumpCommand, OnlineBackup};
pub use catalog::{Catalog, CatalogEntry, PII_CATALOG};
pub use cipher::{probe, AesGcmCipher, FieldCipher, Probe};
pub use config::load as load_config;
pub use engine::{PageReport, Reencryptor, TableReport};
pub use error::{RekeyError, Result};
pub use key_ops::{FieldKey, KeyPair, KeyRole};
pub use ledger::{Ledger, OperationRecord, OperationStatus};
pub use oplog::RunId;
pub use rollback::{rollback, RollbackRequest};
pub use rotation::{rotate, RotationRequest};
pub use run::{RunContext, RunReport};
pub use walker::{FieldRow, PageQuery};
