// src/bin/pii_rotate.rs
//! Forward key rotation: re-encrypt every PII field from the old key to the new one

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use pii_rekey::key_ops::{read_secret, KeyPair};
use pii_rekey::{load_config, oplog, rotate, RotationRequest, RunContext, RunId};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "pii-rotate",
    version,
    about = "Rotate the key protecting PII columns",
    long_about = "Re-encrypts every cataloged PII field from the old key to the new key, \
                  page by page, checkpointing into the progress ledger. Re-run with the same \
                  --rotation-id to resume after a failure."
)]
struct Args {
    /// Key currently protecting the data
    #[arg(long, env = "PII_REKEY_OLD_KEY", hide_env_values = true)]
    old_key: Option<String>,

    /// Key to rotate to
    #[arg(long, env = "PII_REKEY_NEW_KEY", hide_env_values = true)]
    new_key: Option<String>,

    /// Ledger id; reuse it to resume a failed rotation
    #[arg(long, value_name = "ID")]
    rotation_id: Option<String>,

    /// Required safety gate (not needed with --dry-run)
    #[arg(long)]
    confirm_rotation: bool,

    /// Probe and count only; no backup, no ledger, no writes
    #[arg(long)]
    dry_run: bool,

    /// Config file (default: $PII_REKEY_CONFIG or ./pii-rekey.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Rows per transaction
    #[arg(long, value_name = "N")]
    page_size: Option<usize>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if !args.confirm_rotation && !args.dry_run {
        eprintln!("Refusing to run: --confirm-rotation (or --dry-run) is required. Nothing was touched.");
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if tracing::dispatcher::has_been_set() {
                error!(error = %format!("{e:#}"), "rotation FAILED");
            } else {
                eprintln!("rotation FAILED: {e:#}");
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

    let old_key = read_secret(args.old_key, "Old key: ")?;
    let new_key = read_secret(args.new_key, "New key: ")?;
    KeyPair::from_optional(old_key.as_ref(), new_key.as_ref())?;

    let run_id = RunId::generate();
    let log_path = oplog::init(&config.logging, &run_id).context("failed to start run log")?;
    info!(
        run_id = %run_id,
        log = %log_path.display(),
        config = ?config.source,
        database = %config.database.path.display(),
        "pii-rotate"
    );

    let mut ctx = RunContext::from_config(&config, run_id).context("failed to open database")?;
    ctx.dry_run = args.dry_run;
    let report = rotate(
        &mut ctx,
        RotationRequest {
            old_key,
            new_key,
            rotation_id: args.rotation_id,
            confirmed: args.confirm_rotation,
        },
    )?;

    let verb = if report.dry_run { "would rewrite" } else { "rewritten" };
    for table in &report.tables {
        println!(
            "{:<20} {verb} {:>8}  already new {:>8}  rows {:>8}",
            table.table, table.rewritten_fields, table.skipped_fields, table.rows_scanned
        );
    }
    if let Some(path) = &report.backup_path {
        println!("backup: {}", path.display());
    }
    println!("log:    {}", log_path.display());
    if report.dry_run {
        println!("DRY RUN COMPLETE; nothing written");
    } else {
        println!("ROTATION COMPLETE ({})", report.operation_id);
    }
    Ok(())
}
