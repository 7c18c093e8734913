// src/walker.rs
//! Batch walker: pages through a cataloged table in ascending id order
//!
//! Keyset pagination (`id > after ORDER BY id LIMIT n`) rather than OFFSET,
//! so a restart from a committed checkpoint neither repeats nor skips rows.
//! The id bound is always a plain range predicate so SQLite seeks on the
//! primary key instead of scanning from the first row.

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, Row};

use crate::aliases::{Ciphertext, RowId};
use crate::catalog::{quote, CatalogEntry};
use crate::error::{RekeyError, Result};

/// One fetched row: id plus the raw value of every configured field, in catalog order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRow {
    pub id: RowId,
    pub values: Vec<Option<Ciphertext>>,
}

/// Prepared SQL text for one catalog entry
#[derive(Debug, Clone)]
pub struct PageQuery {
    entry: CatalogEntry,
    select_sql: String,
    count_sql: String,
}

impl PageQuery {
    pub fn for_entry(entry: &CatalogEntry) -> Self {
        let id = quote(entry.id_column);
        let table = quote(entry.table);
        let fields: Vec<String> = entry.fields.iter().map(|f| quote(f)).collect();
        let any_present = fields
            .iter()
            .map(|f| format!("{f} IS NOT NULL"))
            .collect::<Vec<_>>()
            .join(" OR ");

        let select_sql = format!(
            "SELECT {id}, {cols} FROM {table} \
             WHERE {id} > ?1 AND ({any_present}) \
             ORDER BY {id} ASC LIMIT ?2",
            cols = fields.join(", "),
        );
        let count_sql = format!("SELECT COUNT(*) FROM {table} WHERE {any_present}");

        Self {
            entry: *entry,
            select_sql,
            count_sql,
        }
    }

    pub fn entry(&self) -> &CatalogEntry {
        &self.entry
    }

    /// Rows with id strictly greater than `after` (or from the start when `None`),
    /// at most `page_size` of them. An empty page means the table is exhausted.
    ///
    /// `None` binds `i64::MIN`, below any INTEGER id.
    pub fn next_page(
        &self,
        conn: &Connection,
        after: Option<RowId>,
        page_size: usize,
    ) -> Result<Vec<FieldRow>> {
        let limit = i64::try_from(page_size)
            .map_err(|_| RekeyError::Config(format!("page size {page_size} out of range")))?;
        let width = self.entry.fields.len();

        let mut stmt = conn.prepare_cached(&self.select_sql)?;
        let rows = stmt
            .query_map(params![after.unwrap_or(RowId::MIN), limit], |row| {
                read_row(row, width)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Rows holding at least one encrypted value
    pub fn count_pending(&self, conn: &Connection) -> Result<u64> {
        let count: i64 = conn.query_row(&self.count_sql, [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

fn read_row(row: &Row<'_>, width: usize) -> rusqlite::Result<FieldRow> {
    let id: RowId = row.get(0)?;
    let mut values = Vec::with_capacity(width);
    for idx in 1..=width {
        let value = match row.get_ref(idx)? {
            ValueRef::Null => None,
            ValueRef::Blob(bytes) | ValueRef::Text(bytes) => Some(bytes.to_vec()),
            other => {
                return Err(rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    other.data_type(),
                    format!("non-binary value in encrypted column (id={id})").into(),
                ))
            }
        };
        values.push(value);
    }
    Ok(FieldRow { id, values })
}
