// src/db.rs
//! Database connection for the PII store
//!
//! The target database must already exist; opening never creates a file.
//! SQLCipher databases are unlocked with `PRAGMA key` before any other statement.

use std::path::Path;

use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use crate::config::DatabaseSettings;
use crate::error::{RekeyError, Result};

pub fn open_database(settings: &DatabaseSettings) -> Result<Connection> {
    open_path(&settings.path, settings.key.as_deref())
}

pub fn open_path(path: &Path, key: Option<&str>) -> Result<Connection> {
    if !path.exists() {
        return Err(RekeyError::Config(format!(
            "database {} does not exist",
            path.display()
        )));
    }

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    if let Some(key) = key {
        apply_key(&conn, key)?;
    }

    // Fails with "file is not a database" on a wrong SQLCipher key
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |r| r.get::<_, i64>(0))
        .map_err(|e| RekeyError::Config(format!("cannot read {}: {e}", path.display())))?;

    debug!(path = %path.display(), encrypted = key.is_some(), "database opened");
    Ok(conn)
}

/// Unlock (or, for a fresh file, set) the SQLCipher passphrase
pub fn apply_key(conn: &Connection, key: &str) -> Result<()> {
    conn.pragma_update(None, "key", key)?;
    Ok(())
}
