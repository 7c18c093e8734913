// src/run.rs
//! Shared run context and the catalog-wide driver used by both controllers

use std::path::PathBuf;

use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::backup::{self, BackupTrigger};
use crate::catalog::Catalog;
use crate::cipher::{AesGcmCipher, FieldCipher};
use crate::config::Config;
use crate::db;
use crate::engine::{Reencryptor, TableReport};
use crate::error::{RekeyError, Result};
use crate::key_ops::KeyPair;
use crate::ledger::{patch, Ledger, Metadata, OperationRecord, OperationStatus};
use crate::oplog::RunId;

/// Everything one run needs, passed explicitly
pub struct RunContext<C = AesGcmCipher, B = Box<dyn BackupTrigger>> {
    pub conn: Connection,
    pub cipher: C,
    pub backup: B,
    pub catalog: Catalog,
    pub page_size: usize,
    pub run_id: RunId,
    pub dry_run: bool,
}

impl RunContext {
    /// Production wiring: configured database, AES-GCM, configured backup
    pub fn from_config(config: &Config, run_id: RunId) -> Result<Self> {
        let conn = db::open_database(&config.database)?;
        let backup = backup::from_settings(&config.backup, &config.database, run_id.as_str());
        Ok(Self {
            conn,
            cipher: AesGcmCipher,
            backup,
            catalog: Catalog::builtin(),
            page_size: config.batch.page_size,
            run_id,
            dry_run: false,
        })
    }
}

/// Final outcome of a rotation or rollback
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub operation_id: String,
    pub backup_path: Option<PathBuf>,
    pub tables: Vec<TableReport>,
    pub dry_run: bool,
}

impl RunReport {
    pub fn rewritten_fields(&self) -> u64 {
        self.tables.iter().map(|t| t.rewritten_fields).sum()
    }

    pub fn skipped_fields(&self) -> u64 {
        self.tables.iter().map(|t| t.skipped_fields).sum()
    }

    pub fn rows_scanned(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_scanned).sum()
    }
}

impl<C: FieldCipher, B: BackupTrigger> RunContext<C, B> {
    /// Read-only checks shared by every run; touch nothing
    pub(crate) fn preflight(&self) -> Result<()> {
        self.catalog.validate()?;
        self.catalog.verify_schema(&self.conn)?;
        Ok(())
    }

    pub(crate) fn take_backup(&self) -> Result<PathBuf> {
        info!(phase = "backup", run_id = %self.run_id, "emergency backup");
        let path = self.backup.create_backup()?;
        info!(phase = "backup", path = %path.display(), "backup artifact ready");
        Ok(path)
    }

    /// Run the engine over every cataloged table, in catalog order.
    ///
    /// With an `operation_id`, each page's checkpoint is written to that
    /// ledger record inside the page transaction. `resume` supplies starting
    /// checkpoints from a previous attempt.
    pub(crate) fn reencrypt_catalog(
        &mut self,
        keys: &KeyPair,
        operation_id: Option<&str>,
        resume: Option<&OperationRecord>,
    ) -> Result<Vec<TableReport>> {
        let engine = Reencryptor::new(&self.cipher, keys, self.page_size)?.dry_run(self.dry_run);
        let mut reports = Vec::with_capacity(self.catalog.describe().len());

        for entry in self.catalog.describe() {
            let checkpoint = resume.and_then(|r| r.checkpoint(entry.table));
            if let Some(id) = checkpoint {
                info!(table = entry.table, after = id, "resuming from checkpoint");
            }

            let report = engine.run_table(&mut self.conn, entry, checkpoint, |tx, page| {
                if let Some(op) = operation_id {
                    Ledger::checkpoint(tx, op, page.table, page.last_id)?;
                }
                Ok(())
            })?;
            reports.push(report);
        }
        Ok(reports)
    }

    /// Best effort: mark `operation_id` failed with the error text. The
    /// original error is what gets returned to the caller either way.
    pub(crate) fn mark_failed(&self, operation_id: &str, err: &RekeyError) {
        let meta = patch([
            ("error", Value::from(err.to_string())),
            ("failed_run_id", Value::from(self.run_id.as_str())),
        ]);
        match Ledger::advance(&self.conn, operation_id, OperationStatus::Failed, meta) {
            Ok(_) => error!(operation_id, error = %err, "operation marked failed"),
            Err(e) => warn!(operation_id, error = %e, "could not record failure in ledger"),
        }
    }
}

/// Common metadata stamped on every ledger record a run creates
pub(crate) fn run_metadata(kind: &str, run_id: &RunId, keys: &KeyPair) -> Metadata {
    patch([
        ("kind", Value::from(kind)),
        ("run_id", Value::from(run_id.as_str())),
        ("source_key_fp", Value::from(keys.source.fingerprint())),
        ("destination_key_fp", Value::from(keys.destination.fingerprint())),
    ])
}
