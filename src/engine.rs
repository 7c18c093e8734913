// src/engine.rs
//! Page-at-a-time re-encryption shared by rotation and rollback
//!
//! One page = one IMMEDIATE transaction. Every configured value in the page
//! is probed with the source key, then the destination key:
//!
//! - opens with source      → re-encrypt under destination, stage for write-back
//! - opens with destination → already converted, skip
//! - opens with neither     → fatal; the page rolls back and the run stops
//!
//! Pages commit strictly in ascending id order, so the last committed id is
//! a valid resume point.

use std::iter;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::aliases::{Ciphertext, RowId};
use crate::catalog::{quote, CatalogEntry};
use crate::cipher::{probe, FieldCipher, Probe};
use crate::error::{RekeyError, Result};
use crate::key_ops::KeyPair;
use crate::walker::{FieldRow, PageQuery};

/// What one committed page did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageReport {
    pub table: &'static str,
    pub page: u64,
    pub rows: usize,
    pub rewritten_rows: usize,
    pub rewritten_fields: usize,
    pub skipped_fields: usize,
    pub last_id: RowId,
}

/// Totals for one table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub table: &'static str,
    pub pages: u64,
    pub rows_scanned: u64,
    pub rewritten_rows: u64,
    pub rewritten_fields: u64,
    pub skipped_fields: u64,
    /// Last committed id (or the starting checkpoint if nothing new was seen)
    pub checkpoint: Option<RowId>,
}

impl TableReport {
    fn absorb(&mut self, page: &PageReport) {
        self.pages += 1;
        self.rows_scanned += page.rows as u64;
        self.rewritten_rows += page.rewritten_rows as u64;
        self.rewritten_fields += page.rewritten_fields as u64;
        self.skipped_fields += page.skipped_fields as u64;
        self.checkpoint = Some(page.last_id);
    }
}

pub struct Reencryptor<'k, C: FieldCipher> {
    cipher: C,
    keys: &'k KeyPair,
    page_size: usize,
    dry_run: bool,
}

impl<'k, C: FieldCipher> Reencryptor<'k, C> {
    pub fn new(cipher: C, keys: &'k KeyPair, page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(RekeyError::Config("page size must be positive".into()));
        }
        Ok(Self {
            cipher,
            keys,
            page_size,
            dry_run: false,
        })
    }

    /// Probe and count, but roll back every page instead of committing
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Re-encrypt every row of `entry` with id greater than `checkpoint`.
    ///
    /// `on_page` runs inside the page transaction just before commit, so
    /// anything it writes (the ledger checkpoint) commits atomically with
    /// the page. An error from it rolls the page back. Not called in dry-run.
    pub fn run_table<F>(
        &self,
        conn: &mut Connection,
        entry: &CatalogEntry,
        checkpoint: Option<RowId>,
        mut on_page: F,
    ) -> Result<TableReport>
    where
        F: FnMut(&Connection, &PageReport) -> Result<()>,
    {
        let query = PageQuery::for_entry(entry);
        let update_sql = update_sql(entry);
        let mut report = TableReport {
            table: entry.table,
            checkpoint,
            ..TableReport::default()
        };
        let mut after = checkpoint;
        let pending_rows = query.count_pending(conn)?;

        info!(
            table = entry.table,
            fields = ?entry.fields,
            pending_rows,
            resume_after = ?checkpoint,
            page_size = self.page_size,
            dry_run = self.dry_run,
            "table started"
        );

        loop {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let rows = query.next_page(&tx, after, self.page_size)?;
            let Some(last) = rows.last() else {
                break;
            };

            let mut page = PageReport {
                table: entry.table,
                page: report.pages + 1,
                rows: rows.len(),
                last_id: last.id,
                ..PageReport::default()
            };

            if let Err(e) = self.rewrite_page(&tx, entry, &update_sql, &rows, &mut page) {
                error!(
                    table = entry.table,
                    page = page.page,
                    after = ?after,
                    error = %e,
                    "page failed; rolling back"
                );
                rollback_quietly(tx, entry.table);
                return Err(e);
            }

            if self.dry_run {
                tx.rollback()?;
            } else {
                if let Err(e) = on_page(&*tx, &page) {
                    error!(table = entry.table, page = page.page, error = %e, "checkpoint failed; rolling back");
                    rollback_quietly(tx, entry.table);
                    return Err(e);
                }
                tx.commit()?;
            }

            info!(
                table = entry.table,
                page = page.page,
                rows = page.rows,
                rewritten_rows = page.rewritten_rows,
                rewritten_fields = page.rewritten_fields,
                skipped_fields = page.skipped_fields,
                last_id = page.last_id,
                committed = !self.dry_run,
                "page done"
            );
            report.absorb(&page);
            after = Some(page.last_id);
        }

        info!(
            table = entry.table,
            pages = report.pages,
            rows_scanned = report.rows_scanned,
            rewritten_fields = report.rewritten_fields,
            skipped_fields = report.skipped_fields,
            checkpoint = ?report.checkpoint,
            "table finished"
        );
        Ok(report)
    }

    fn rewrite_page(
        &self,
        tx: &Transaction<'_>,
        entry: &CatalogEntry,
        update_sql: &str,
        rows: &[FieldRow],
        page: &mut PageReport,
    ) -> Result<()> {
        let mut stmt = tx.prepare_cached(update_sql)?;

        for row in rows {
            let staged = self.reencrypt_row(entry, row, page)?;
            if staged.iter().all(Option::is_none) {
                continue;
            }

            let params = staged
                .into_iter()
                .map(|v| v.map_or(Value::Null, Value::Blob))
                .chain(iter::once(Value::Integer(row.id)));
            let changed = stmt.execute(params_from_iter(params))?;
            if changed != 1 {
                return Err(RekeyError::Sql(rusqlite::Error::StatementChangedRows(changed)));
            }
            page.rewritten_rows += 1;
        }
        Ok(())
    }

    /// New ciphertext for each field that needs it, `None` where the value stays
    fn reencrypt_row(
        &self,
        entry: &CatalogEntry,
        row: &FieldRow,
        page: &mut PageReport,
    ) -> Result<Vec<Option<Ciphertext>>> {
        let mut staged = Vec::with_capacity(row.values.len());

        for (field, value) in entry.fields.iter().zip(&row.values) {
            let Some(value) = value else {
                staged.push(None);
                continue;
            };

            match probe(&self.cipher, value, self.keys) {
                Probe::Source(plaintext) => {
                    let sealed = self.cipher.encrypt(&plaintext, &self.keys.destination)?;
                    staged.push(Some(sealed));
                    page.rewritten_fields += 1;
                }
                Probe::Destination => {
                    debug!(table = entry.table, field, id = row.id, "already under destination key");
                    staged.push(None);
                    page.skipped_fields += 1;
                }
                Probe::Undecryptable => {
                    error!(
                        table = entry.table,
                        field,
                        id = row.id,
                        "UNDECRYPTABLE: neither key opens this value; DBA intervention required"
                    );
                    return Err(RekeyError::Undecryptable {
                        table: entry.table,
                        field: *field,
                        id: row.id,
                    });
                }
            }
        }
        Ok(staged)
    }
}

/// The page error is what the caller needs; a failed rollback is only logged
fn rollback_quietly(tx: Transaction<'_>, table: &str) {
    if let Err(e) = tx.rollback() {
        error!(table, error = %e, "rollback failed");
    }
}

/// `UPDATE t SET f1 = COALESCE(?1, f1), ... WHERE id = ?N`, so one prepared
/// statement serves any subset of staged fields
fn update_sql(entry: &CatalogEntry) -> String {
    let sets = entry
        .fields
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let col = quote(f);
            format!("{col} = COALESCE(?{n}, {col})", n = i + 1)
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {table} SET {sets} WHERE {id} = ?{n}",
        table = quote(entry.table),
        id = quote(entry.id_column),
        n = entry.fields.len() + 1
    )
}
