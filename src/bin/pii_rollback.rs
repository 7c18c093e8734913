// src/bin/pii_rollback.rs
//! Emergency rollback: re-encrypt every PII field from a failed key back to the last good one

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use pii_rekey::key_ops::{read_secret, KeyPair};
use pii_rekey::{load_config, oplog, rollback, RollbackRequest, RunContext, RunId};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "pii-rollback",
    version,
    about = "Undo a failed PII key rotation",
    long_about = "Re-encrypts every cataloged PII field from the failed key back to the \
                  restore key. Takes a full database backup first. Refuses to run without \
                  --confirm-rollback."
)]
struct Args {
    /// Key the failed rotation was encrypting to
    #[arg(long, env = "PII_REKEY_FAILED_KEY", hide_env_values = true)]
    failed_key: Option<String>,

    /// Previously good key to restore
    #[arg(long, env = "PII_REKEY_RESTORE_KEY", hide_env_values = true)]
    restore_key: Option<String>,

    /// Rotation to mark rolled_back in the progress ledger
    #[arg(long, value_name = "ID")]
    rotation_id: Option<String>,

    /// Required safety gate; without it nothing is touched
    #[arg(long)]
    confirm_rollback: bool,

    /// Config file (default: $PII_REKEY_CONFIG or ./pii-rekey.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Rows per transaction
    #[arg(long, value_name = "N")]
    page_size: Option<usize>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if !args.confirm_rollback {
        eprintln!("Refusing to run: --confirm-rollback is required. Nothing was touched.");
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if tracing::dispatcher::has_been_set() {
                error!(error = %format!("{e:#}"), "rollback FAILED");
            } else {
                eprintln!("rollback FAILED: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = load_config(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(n) = args.page_size {
        config.batch.page_size = n;
        config.validate()?;
    }

    let failed_key = read_secret(args.failed_key, "Failed key: ")?;
    let restore_key = read_secret(args.restore_key, "Restore key: ")?;
    // Reject missing/equal keys before the database is even opened
    KeyPair::from_optional(failed_key.as_ref(), restore_key.as_ref())?;

    let run_id = RunId::generate();
    let log_path = oplog::init(&config.logging, &run_id).context("failed to start run log")?;
    info!(
        run_id = %run_id,
        log = %log_path.display(),
        config = ?config.source,
        database = %config.database.path.display(),
        "pii-rollback"
    );

    let mut ctx = RunContext::from_config(&config, run_id).context("failed to open database")?;
    let report = rollback(
        &mut ctx,
        RollbackRequest {
            failed_key,
            restore_key,
            rotation_id: args.rotation_id,
            confirmed: args.confirm_rollback,
        },
    )?;

    for table in &report.tables {
        println!(
            "{:<20} restored {:>8}  already ok {:>8}  rows {:>8}",
            table.table, table.rewritten_fields, table.skipped_fields, table.rows_scanned
        );
    }
    if let Some(path) = &report.backup_path {
        println!("backup: {}", path.display());
    }
    println!("log:    {}", log_path.display());
    println!("ROLLBACK COMPLETE ({})", report.operation_id);
    Ok(())
}
