// src/rollback.rs
//! Emergency rollback of a failed rotation
//!
//! Same engine as rotation with the roles swapped: the key the rotation
//! was moving *to* (now considered failed) is the source, the previously
//! good key is the destination. Rows the rotation never reached already
//! open with the restore key and are skipped.
//!
//! Never retried automatically. On any fatal error the rollback's own
//! ledger record is left `failed` and a human takes over.

use rusqlite::Connection;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::aliases::KeySecret;
use crate::backup::BackupTrigger;
use crate::cipher::FieldCipher;
use crate::error::{RekeyError, Result};
use crate::key_ops::KeyPair;
use crate::ledger::{patch, Ledger, Metadata, OperationRecord, OperationStatus};
use crate::oplog::RunId;
use crate::run::{run_metadata, RunContext, RunReport};

#[derive(Debug, Default)]
pub struct RollbackRequest {
    /// Key the failed rotation was encrypting to
    pub failed_key: Option<KeySecret>,
    /// Last known-good key
    pub restore_key: Option<KeySecret>,
    /// Rotation to mark `rolled_back` on success
    pub rotation_id: Option<String>,
    pub confirmed: bool,
}

pub fn rollback<C: FieldCipher, B: BackupTrigger>(
    ctx: &mut RunContext<C, B>,
    request: RollbackRequest,
) -> Result<RunReport> {
    if !request.confirmed && !ctx.dry_run {
        warn!("rollback refused: --confirm-rollback not given; nothing was touched");
        return Err(RekeyError::ConfirmationRequired);
    }
    let keys = KeyPair::from_optional(request.failed_key.as_ref(), request.restore_key.as_ref())?;
    ctx.preflight()?;

    let operation_id = format!("rollback-{}", ctx.run_id);
    info!(
        phase = "start",
        operation_id = %operation_id,
        rotation_id = ?request.rotation_id,
        failed_key = %keys.source.fingerprint(),
        restore_key = %keys.destination.fingerprint(),
        dry_run = ctx.dry_run,
        "emergency rollback starting"
    );

    if ctx.dry_run {
        let tables = ctx.reencrypt_catalog(&keys, None, None)?;
        let report = RunReport {
            operation_id,
            backup_path: None,
            tables,
            dry_run: true,
        };
        info!(
            phase = "done",
            would_restore = report.rewritten_fields(),
            already_restored = report.skipped_fields(),
            "dry run complete; nothing written"
        );
        return Ok(report);
    }

    // Read-only until the backup exists
    let target = match request.rotation_id.as_deref() {
        Some(id) => lookup_target(ctx, id)?,
        None => None,
    };

    let backup_path = ctx.take_backup()?;

    Ledger::ensure_schema(&ctx.conn)?;
    if let Some(target) = &target {
        supersede(ctx, target)?;
    }

    let mut meta = run_metadata("rollback", &ctx.run_id, &keys);
    meta.insert("backup_path".into(), Value::from(backup_path.display().to_string()));
    if let Some(target) = &target {
        meta.insert("target_rotation".into(), Value::from(target.operation_id.clone()));
    }
    Ledger::create_with(&ctx.conn, &operation_id, meta)?;
    Ledger::advance(
        &ctx.conn,
        &operation_id,
        OperationStatus::InProgress,
        patch([("phase", "reencrypt")]),
    )?;

    let tables = match ctx.reencrypt_catalog(&keys, Some(&operation_id), None) {
        Ok(tables) => tables,
        Err(e) => {
            error!(
                operation_id = %operation_id,
                error = %e,
                "ROLLBACK ABORTED: manual intervention required; prior pages stay committed"
            );
            ctx.mark_failed(&operation_id, &e);
            return Err(e);
        }
    };

    let report = RunReport {
        operation_id: operation_id.clone(),
        backup_path: Some(backup_path),
        tables,
        dry_run: false,
    };

    let summary = patch([
        ("phase", Value::from("done")),
        ("restored_fields", Value::from(report.rewritten_fields())),
        ("already_restored_fields", Value::from(report.skipped_fields())),
    ]);
    let target_id = target.as_ref().map(|t| t.operation_id.as_str());
    if let Err(e) = close_out(&mut ctx.conn, &operation_id, target_id, &ctx.run_id, summary) {
        ctx.mark_failed(&operation_id, &e);
        return Err(e);
    }
    if let Some(id) = target_id {
        info!(rotation_id = id, "rotation marked rolled_back");
    }

    info!(
        phase = "done",
        operation_id = %report.operation_id,
        restored_fields = report.rewritten_fields(),
        already_restored_fields = report.skipped_fields(),
        "emergency rollback completed"
    );
    Ok(report)
}

/// Own record to `completed` and target to `rolled_back`, in one transaction
fn close_out(
    conn: &mut Connection,
    operation_id: &str,
    target_id: Option<&str>,
    run_id: &RunId,
    summary: Metadata,
) -> Result<()> {
    let tx = conn.transaction()?;
    Ledger::advance(&tx, operation_id, OperationStatus::Completed, summary)?;
    if let Some(target_id) = target_id {
        Ledger::advance(
            &tx,
            target_id,
            OperationStatus::RolledBack,
            patch([
                ("rolled_back_by", operation_id),
                ("rolled_back_run_id", run_id.as_str()),
            ]),
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Load the rotation being undone. Read-only.
///
/// Unknown ids (or no ledger yet) only warn; the data is rolled back
/// regardless. Completed or already rolled-back rotations are refused.
fn lookup_target<C: FieldCipher, B: BackupTrigger>(
    ctx: &RunContext<C, B>,
    rotation_id: &str,
) -> Result<Option<OperationRecord>> {
    let record = if Ledger::has_schema(&ctx.conn)? {
        Ledger::get(&ctx.conn, rotation_id)?
    } else {
        None
    };
    let Some(record) = record else {
        warn!(rotation_id, "rotation id not found in ledger; proceeding without ledger update");
        return Ok(None);
    };

    info!(
        rotation_id,
        status = %record.status,
        updated_at = %record.updated_at,
        "last known rotation status"
    );

    if record.status.is_terminal() {
        return Err(RekeyError::Config(format!(
            "rotation {rotation_id} is {}; refusing to roll it back",
            record.status
        )));
    }
    Ok(Some(record))
}

/// A rotation still `pending`/`in_progress` is abandoned: mark it `failed`
/// so it can move to `rolled_back` at the end
fn supersede<C: FieldCipher, B: BackupTrigger>(
    ctx: &RunContext<C, B>,
    target: &OperationRecord,
) -> Result<()> {
    let id = target.operation_id.as_str();
    let reason = patch([
        ("error", Value::from("superseded by emergency rollback")),
        ("failed_run_id", Value::from(ctx.run_id.as_str())),
    ]);
    match target.status {
        OperationStatus::Pending => {
            Ledger::advance(&ctx.conn, id, OperationStatus::InProgress, Metadata::new())?;
            Ledger::advance(&ctx.conn, id, OperationStatus::Failed, reason)?;
        }
        OperationStatus::InProgress => {
            Ledger::advance(&ctx.conn, id, OperationStatus::Failed, reason)?;
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        Ledger::ensure_schema(&conn).unwrap();
        Ledger::create(&conn, "rollback-r1").unwrap();
        Ledger::advance(&conn, "rollback-r1", OperationStatus::InProgress, Metadata::new()).unwrap();
        conn
    }

    #[test]
    fn close_out_marks_both_records() {
        let mut conn = ledger();
        Ledger::create(&conn, "rot").unwrap();
        Ledger::advance(&conn, "rot", OperationStatus::InProgress, Metadata::new()).unwrap();
        Ledger::advance(&conn, "rot", OperationStatus::Failed, Metadata::new()).unwrap();

        close_out(&mut conn, "rollback-r1", Some("rot"), &RunId::from("r1"), Metadata::new()).unwrap();

        let own = Ledger::get(&conn, "rollback-r1").unwrap().unwrap();
        let rot = Ledger::get(&conn, "rot").unwrap().unwrap();
        assert_eq!(own.status, OperationStatus::Completed);
        assert_eq!(rot.status, OperationStatus::RolledBack);
        assert_eq!(rot.metadata["rolled_back_by"], "rollback-r1");
    }

    #[test]
    fn close_out_is_all_or_nothing() {
        let mut conn = ledger();
        // target moved to a terminal state behind our back
        Ledger::create(&conn, "rot").unwrap();
        Ledger::advance(&conn, "rot", OperationStatus::InProgress, Metadata::new()).unwrap();
        Ledger::advance(&conn, "rot", OperationStatus::Completed, Metadata::new()).unwrap();

        let err = close_out(&mut conn, "rollback-r1", Some("rot"), &RunId::from("r1"), Metadata::new())
            .unwrap_err();
        assert!(matches!(err, RekeyError::InvalidTransition { .. }));

        // own record was not left completed, so it can still be marked failed
        let own = Ledger::get(&conn, "rollback-r1").unwrap().unwrap();
        assert_eq!(own.status, OperationStatus::InProgress);
        Ledger::advance(&conn, "rollback-r1", OperationStatus::Failed, Metadata::new()).unwrap();
    }
}
