// tests/support.rs
//! Test fixtures: a throwaway PII database laid out like the built-in catalog,
//! plus cipher and backup doubles for fault injection

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use pii_rekey::aliases::{Ciphertext, Plaintext};
use pii_rekey::{
    AesGcmCipher, BackupTrigger, Catalog, CatalogEntry, FieldCipher, FieldKey, RekeyError,
    RunContext, RunId, PII_CATALOG,
};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use tempfile::TempDir;

pub const OLD_KEY: &str = "old-pii-key-2025";
pub const NEW_KEY: &str = "new-pii-key-2025";
pub const PAGE_SIZE: usize = 50;

/// `(table, id, field)` → raw stored bytes
pub type Snapshot = BTreeMap<(String, i64, String), Option<Vec<u8>>>;

pub fn key(secret: &str) -> FieldKey {
    FieldKey::derive(secret).expect("derive key")
}

/// Deterministic plaintext for one cell
pub fn plaintext(table: &str, id: i64, field: &str) -> String {
    format!("{table}.{field}#{id}")
}

fn rows_for(table: &str) -> i64 {
    match table {
        "contacts" => 120,
        "companies" => 30,
        _ => 15,
    }
}

/// First field is always set; field `i` is NULL when `id % (i + 2) == 0`
fn is_null(id: i64, field_idx: usize) -> bool {
    field_idx > 0 && id % (field_idx as i64 + 2) == 0
}

pub struct TestDb {
    dir: TempDir,
    pub path: PathBuf,
}

impl TestDb {
    /// Empty tables for every catalog entry, plus a non-PII `label` column
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.db");
        let conn = Connection::open(&path).expect("create db");
        for entry in PII_CATALOG {
            let cols = entry
                .fields
                .iter()
                .map(|f| format!("{f} BLOB"))
                .collect::<Vec<_>>()
                .join(", ");
            conn.execute_batch(&format!(
                "CREATE TABLE {} ({} INTEGER PRIMARY KEY, label TEXT NOT NULL, {cols});",
                entry.table, entry.id_column
            ))
            .expect("create table");
        }
        Self { dir, path }
    }

    pub fn seeded(secret: &str) -> Self {
        let db = Self::new();
        db.seed(&key(secret));
        db
    }

    pub fn conn(&self) -> Connection {
        Connection::open(&self.path).expect("open db")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.dir.path().join("backups")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.dir.path().join("logs")
    }

    /// Fill every cataloged table under `key`, plus one contact with no PII at all
    pub fn seed(&self, key: &FieldKey) {
        let mut conn = self.conn();
        let tx = conn.transaction().expect("seed tx");
        for entry in PII_CATALOG {
            let placeholders = (1..=entry.fields.len() + 2)
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "INSERT INTO {} ({}, label, {}) VALUES ({placeholders})",
                entry.table,
                entry.id_column,
                entry.fields.join(", ")
            );
            for id in 1..=rows_for(entry.table) {
                let mut values = vec![Value::Integer(id), Value::Text(format!("row {id}"))];
                for (i, field) in entry.fields.iter().enumerate() {
                    values.push(if is_null(id, i) {
                        Value::Null
                    } else {
                        Value::Blob(seal(key, &plaintext(entry.table, id, field)))
                    });
                }
                tx.execute(&sql, params_from_iter(values)).expect("seed row");
            }
        }
        tx.execute(
            "INSERT INTO contacts (id, label) VALUES (?1, 'no pii')",
            [rows_for("contacts") + 1],
        )
        .expect("seed empty row");
        tx.commit().expect("seed commit");
    }

    /// Overwrite one cell with a ciphertext neither run key can open
    pub fn corrupt(&self, table: &str, field: &str, id: i64) {
        let foreign = seal(&key("some-unrelated-key"), "garbage");
        self.conn()
            .execute(
                &format!("UPDATE {table} SET {field} = ?1 WHERE id = ?2"),
                rusqlite::params![foreign, id],
            )
            .expect("corrupt cell");
    }

    pub fn snapshot(&self) -> Snapshot {
        snapshot_of(&self.conn()).expect("snapshot")
    }

    /// Decrypt every stored value under `key`; panics naming the first cell that won't open
    pub fn decrypt_all(&self, key: &FieldKey) -> BTreeMap<(String, i64, String), String> {
        self.snapshot()
            .into_iter()
            .filter_map(|(cell, value)| value.map(|v| (cell, v)))
            .map(|(cell, value)| {
                let pt = AesGcmCipher
                    .decrypt(&value, key)
                    .unwrap_or_else(|| panic!("{cell:?} does not open under {key:?}"));
                let text = String::from_utf8(pt.to_vec()).expect("utf8 plaintext");
                (cell, text)
            })
            .collect()
    }

    /// True when every non-NULL PII value of the row opens under `key`
    pub fn row_opens_under(&self, key: &FieldKey, table: &str, id: i64) -> bool {
        self.snapshot()
            .into_iter()
            .filter(|((t, i, _), _)| t == table && *i == id)
            .filter_map(|(_, v)| v)
            .all(|v| AesGcmCipher.decrypt(&v, key).is_some())
    }

    /// Non-NULL PII values across the whole catalog
    pub fn field_count(&self) -> u64 {
        self.snapshot().values().filter(|v| v.is_some()).count() as u64
    }

    /// Non-NULL PII values in `table` with id <= `max_id`
    pub fn field_count_upto(&self, table: &str, max_id: i64) -> u64 {
        self.snapshot()
            .iter()
            .filter(|((t, id, _), v)| t == table && *id <= max_id && v.is_some())
            .count() as u64
    }

    pub fn ledger_exists(&self) -> bool {
        self.conn()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'rotation_progress'",
                [],
                |r| r.get::<_, i64>(0),
            )
            .expect("query sqlite_master")
            > 0
    }

    pub fn context<C: FieldCipher, B: BackupTrigger>(
        &self,
        cipher: C,
        backup: B,
    ) -> RunContext<C, B> {
        RunContext {
            conn: self.conn(),
            cipher,
            backup,
            catalog: Catalog::builtin(),
            page_size: PAGE_SIZE,
            run_id: RunId::generate(),
            dry_run: false,
        }
    }

    pub fn recording_backup(&self) -> RecordingBackup {
        RecordingBackup {
            database: self.path.clone(),
            dir: self.backup_dir(),
            calls: Cell::new(0),
            seen: RefCell::new(Vec::new()),
        }
    }
}

impl Default for TestDb {
    fn default() -> Self {
        Self::new()
    }
}

pub fn seal(key: &FieldKey, text: &str) -> Ciphertext {
    AesGcmCipher.encrypt(text.as_bytes(), key).expect("seal")
}

fn snapshot_of(conn: &Connection) -> rusqlite::Result<Snapshot> {
    let mut snap = Snapshot::new();
    for entry in PII_CATALOG {
        read_entry(conn, entry, &mut snap)?;
    }
    Ok(snap)
}

fn read_entry(conn: &Connection, entry: &CatalogEntry, snap: &mut Snapshot) -> rusqlite::Result<()> {
    let sql = format!(
        "SELECT {}, {} FROM {} ORDER BY {}",
        entry.id_column,
        entry.fields.join(", "),
        entry.table,
        entry.id_column
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        for (i, field) in entry.fields.iter().enumerate() {
            let value: Option<Vec<u8>> = row.get(i + 1)?;
            snap.insert((entry.table.to_string(), id, field.to_string()), value);
        }
    }
    Ok(())
}

/// Captures the database state as it was when the backup was requested,
/// and writes a non-empty artifact
pub struct RecordingBackup {
    database: PathBuf,
    dir: PathBuf,
    pub calls: Cell<usize>,
    pub seen: RefCell<Vec<Snapshot>>,
}

impl BackupTrigger for RecordingBackup {
    fn create_backup(&self) -> pii_rekey::Result<PathBuf> {
        let snap = snapshot_of(&Connection::open(&self.database)?)?;
        fs::create_dir_all(&self.dir)?;
        let n = self.calls.get() + 1;
        self.calls.set(n);
        let path = self.dir.join(format!("backup-{n}.txt"));
        fs::write(&path, format!("{snap:?}"))?;
        self.seen.borrow_mut().push(snap);
        Ok(path)
    }
}

/// Always fails, like a full disk
pub struct FailingBackup;

impl BackupTrigger for FailingBackup {
    fn create_backup(&self) -> pii_rekey::Result<PathBuf> {
        Err(RekeyError::Backup("no space left on device".into()))
    }
}

/// AES-GCM that starts failing after `budget` successful encryptions
pub struct FlakyCipher {
    budget: Cell<usize>,
}

impl FlakyCipher {
    pub fn failing_after(budget: usize) -> Self {
        Self {
            budget: Cell::new(budget),
        }
    }
}

impl FieldCipher for FlakyCipher {
    fn encrypt(&self, plaintext: &[u8], key: &FieldKey) -> pii_rekey::Result<Ciphertext> {
        match self.budget.get() {
            0 => Err(RekeyError::Crypto("injected encrypt failure".into())),
            n => {
                self.budget.set(n - 1);
                AesGcmCipher.encrypt(plaintext, key)
            }
        }
    }

    fn decrypt(&self, ciphertext: &[u8], key: &FieldKey) -> Option<Plaintext> {
        AesGcmCipher.decrypt(ciphertext, key)
    }
}
