// src/backup.rs
//! Emergency backup: a full copy of the database before any bulk rewrite
//!
//! Artifacts are named by UTC timestamp + run id and are never overwritten.
//! Any failure here aborts the run before data is touched.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use chrono::Utc;
use rusqlite::backup::Backup;
use rusqlite::Connection;
use tracing::{error, info};

use crate::config::{BackupMethod, BackupSettings, DatabaseSettings};
use crate::db;
use crate::error::{RekeyError, Result};

/// Pages copied per step of the online backup
const BACKUP_PAGES_PER_STEP: i32 = 256;

pub trait BackupTrigger {
    /// Produce a fresh, non-empty backup artifact and return its path
    fn create_backup(&self) -> Result<PathBuf>;
}

impl<B: BackupTrigger + ?Sized> BackupTrigger for &B {
    fn create_backup(&self) -> Result<PathBuf> {
        (**self).create_backup()
    }
}

impl<B: BackupTrigger + ?Sized> BackupTrigger for Box<B> {
    fn create_backup(&self) -> Result<PathBuf> {
        (**self).create_backup()
    }
}

/// Pick the configured backup strategy
pub fn from_settings(
    backup: &BackupSettings,
    database: &DatabaseSettings,
    run_id: &str,
) -> Box<dyn BackupTrigger> {
    match backup.method {
        BackupMethod::Online => Box::new(OnlineBackup {
            database: database.clone(),
            dir: backup.dir.clone(),
            run_id: run_id.to_string(),
        }),
        BackupMethod::Dump => Box::new(DumpCommand {
            program: backup.command.clone(),
            args: backup.args.clone(),
            database: database.path.clone(),
            dir: backup.dir.clone(),
            run_id: run_id.to_string(),
        }),
    }
}

/// SQLite's online backup API, page by page, into a `.db` file
pub struct OnlineBackup {
    pub database: DatabaseSettings,
    pub dir: PathBuf,
    pub run_id: String,
}

impl BackupTrigger for OnlineBackup {
    fn create_backup(&self) -> Result<PathBuf> {
        let target = artifact_path(&self.dir, &self.run_id, "db")?;
        info!(target = %target.display(), "starting online backup");

        let result = (|| -> Result<()> {
            let src = db::open_database(&self.database)?;
            let mut dst = Connection::open(&target)?;
            if let Some(key) = self.database.key.as_deref() {
                db::apply_key(&dst, key)?;
            }
            let backup = Backup::new(&src, &mut dst)?;
            backup.run_to_completion(BACKUP_PAGES_PER_STEP, Duration::ZERO, None)?;
            Ok(())
        })();

        if let Err(e) = result {
            error!(target = %target.display(), error = %e, "online backup failed");
            let _ = fs::remove_file(&target);
            return Err(RekeyError::Backup(e.to_string()));
        }

        ensure_non_empty(&target)?;
        info!(target = %target.display(), "online backup complete");
        Ok(target)
    }
}

/// External export tool (e.g. `sqlite3 <db> .dump`); stdout becomes the artifact
pub struct DumpCommand {
    pub program: String,
    pub args: Vec<String>,
    pub database: PathBuf,
    pub dir: PathBuf,
    pub run_id: String,
}

impl DumpCommand {
    fn resolved_args(&self) -> Vec<String> {
        let db = self.database.display().to_string();
        self.args.iter().map(|a| a.replace("{db}", &db)).collect()
    }
}

impl BackupTrigger for DumpCommand {
    fn create_backup(&self) -> Result<PathBuf> {
        let target = artifact_path(&self.dir, &self.run_id, "sql")?;
        let out = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .map_err(|e| RekeyError::Backup(format!("cannot create {}: {e}", target.display())))?;

        let args = self.resolved_args();
        info!(program = %self.program, ?args, target = %target.display(), "invoking export tool");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::piped())
            .spawn()
            .and_then(|child| child.wait_with_output());

        let output = match output {
            Ok(o) => o,
            Err(e) => {
                let _ = fs::remove_file(&target);
                return Err(RekeyError::Backup(format!(
                    "failed to invoke {}: {e}",
                    self.program
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(program = %self.program, status = %output.status, %stderr, "export tool failed");
            let _ = fs::remove_file(&target);
            return Err(RekeyError::Backup(format!(
                "{} exited with {}: {stderr}",
                self.program, output.status
            )));
        }

        ensure_non_empty(&target)?;
        info!(target = %target.display(), "dump backup complete");
        Ok(target)
    }
}

/// `<dir>/backup-<UTC yyyymmddTHHMMSSZ>-<run id>.<ext>`; refuses to reuse a path
pub fn artifact_path(dir: &Path, run_id: &str, ext: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .map_err(|e| RekeyError::Backup(format!("cannot create {}: {e}", dir.display())))?;
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let path = dir.join(format!("backup-{stamp}-{run_id}.{ext}"));
    if path.exists() {
        return Err(RekeyError::Backup(format!(
            "backup artifact {} already exists; refusing to overwrite",
            path.display()
        )));
    }
    Ok(path)
}

/// An empty artifact is removed and reported as a failed backup
fn ensure_non_empty(path: &Path) -> Result<()> {
    let len = File::open(path)
        .and_then(|f| f.metadata())
        .map(|m| m.len())
        .map_err(|e| RekeyError::Backup(format!("cannot stat {}: {e}", path.display())))?;
    if len == 0 {
        let _ = fs::remove_file(path);
        return Err(RekeyError::Backup(format!(
            "backup artifact {} is empty",
            path.display()
        )));
    }
    Ok(())
}
