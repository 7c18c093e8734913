// src/rotation.rs
//! Forward key rotation: every cataloged PII field from the old key to the new one
//!
//! Resumable. Re-invoking with the same rotation id after a failure (or a
//! killed process) continues from the per-table checkpoints committed in
//! the ledger; the dual-key probe makes any overlap harmless.

use serde_json::Value;
use tracing::{info, warn};

use crate::aliases::KeySecret;
use crate::backup::BackupTrigger;
use crate::cipher::FieldCipher;
use crate::error::{RekeyError, Result};
use crate::key_ops::KeyPair;
use crate::ledger::{patch, Ledger, OperationRecord, OperationStatus};
use crate::run::{run_metadata, RunContext, RunReport};

#[derive(Debug, Default)]
pub struct RotationRequest {
    pub old_key: Option<KeySecret>,
    pub new_key: Option<KeySecret>,
    /// Ledger id; generated from the run id when absent
    pub rotation_id: Option<String>,
    pub confirmed: bool,
}

pub fn rotate<C: FieldCipher, B: BackupTrigger>(
    ctx: &mut RunContext<C, B>,
    request: RotationRequest,
) -> Result<RunReport> {
    if !request.confirmed && !ctx.dry_run {
        warn!("rotation refused: --confirm-rotation not given");
        return Err(RekeyError::ConfirmationRequired);
    }
    let keys = KeyPair::from_optional(request.old_key.as_ref(), request.new_key.as_ref())?;
    ctx.preflight()?;

    let operation_id = request
        .rotation_id
        .clone()
        .unwrap_or_else(|| format!("rotation-{}", ctx.run_id));

    info!(
        phase = "start",
        operation_id = %operation_id,
        run_id = %ctx.run_id,
        source_key = %keys.source.fingerprint(),
        destination_key = %keys.destination.fingerprint(),
        dry_run = ctx.dry_run,
        "key rotation starting"
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
            would_rewrite = report.rewritten_fields(),
            already_converted = report.skipped_fields(),
            "dry run complete; nothing written"
        );
        return Ok(report);
    }

    Ledger::ensure_schema(&ctx.conn)?;
    let resume = open_operation(ctx, &operation_id, &keys)?;

    let outcome = (|| -> Result<RunReport> {
        let backup_path = ctx.take_backup()?;
        Ledger::advance(
            &ctx.conn,
            &operation_id,
            OperationStatus::InProgress,
            patch([
                ("phase", Value::from("reencrypt")),
                ("backup_path", Value::from(backup_path.display().to_string())),
            ]),
        )?;

        let tables = ctx.reencrypt_catalog(&keys, Some(&operation_id), resume.as_ref())?;
        let report = RunReport {
            operation_id: operation_id.clone(),
            backup_path: Some(backup_path),
            tables,
            dry_run: false,
        };

        Ledger::advance(
            &ctx.conn,
            &operation_id,
            OperationStatus::Completed,
            patch([
                ("phase", Value::from("done")),
                ("rewritten_fields", Value::from(report.rewritten_fields())),
                ("skipped_fields", Value::from(report.skipped_fields())),
            ]),
        )?;
        Ok(report)
    })();

    match outcome {
        Ok(report) => {
            info!(
                phase = "done",
                operation_id = %report.operation_id,
                rewritten_fields = report.rewritten_fields(),
                skipped_fields = report.skipped_fields(),
                "key rotation completed"
            );
            Ok(report)
        }
        Err(e) => {
            ctx.mark_failed(&operation_id, &e);
            Err(e)
        }
    }
}

/// Create the ledger record, or pick up a previous attempt of the same id.
/// Returns the prior record when resuming.
fn open_operation<C: FieldCipher, B: BackupTrigger>(
    ctx: &RunContext<C, B>,
    operation_id: &str,
    keys: &KeyPair,
) -> Result<Option<OperationRecord>> {
    let meta = run_metadata("rotation", &ctx.run_id, keys);

    let Some(existing) = Ledger::get(&ctx.conn, operation_id)? else {
        Ledger::create_with(&ctx.conn, operation_id, meta)?;
        Ledger::advance(
            &ctx.conn,
            operation_id,
            OperationStatus::InProgress,
            patch([("phase", "backup")]),
        )?;
        return Ok(None);
    };

    match existing.status {
        OperationStatus::Completed | OperationStatus::RolledBack => {
            Err(RekeyError::Config(format!(
                "rotation {operation_id} is already {}; use a new rotation id",
                existing.status
            )))
        }
        status => {
            // A resume must use the same key pair or the checkpoints are meaningless
            for (field, fp) in [
                ("source_key_fp", keys.source.fingerprint()),
                ("destination_key_fp", keys.destination.fingerprint()),
            ] {
                if let Some(recorded) = existing.metadata.get(field).and_then(Value::as_str) {
                    if recorded != fp {
                        return Err(RekeyError::Config(format!(
                            "rotation {operation_id} was started with a different key ({field})"
                        )));
                    }
                }
            }

            info!(operation_id, %status, "resuming existing rotation");
            let mut resume_meta = meta;
            resume_meta.insert("phase".into(), Value::from("backup"));
            resume_meta.insert("resumed_from".into(), Value::from(status.as_str()));
            Ledger::advance(&ctx.conn, operation_id, OperationStatus::InProgress, resume_meta)?;
            Ok(Some(existing))
        }
    }
}
