// src/ledger.rs
//! Progress ledger: durable audit and resume record per operation
//!
//! Rows are never deleted. Status moves through a small state machine;
//! metadata is a JSON object merged shallowly on every `advance`.

use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::aliases::RowId;
use crate::consts::{CHECKPOINT_PREFIX, LEDGER_TABLE};
use crate::error::{RekeyError, Result};

pub type Metadata = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl OperationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::InProgress => "in_progress",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::RolledBack)
    }

    pub fn can_advance_to(self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Failed, InProgress)
                | (Failed, RolledBack)
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = RekeyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(OperationStatus::Pending),
            "in_progress" => Ok(OperationStatus::InProgress),
            "completed" => Ok(OperationStatus::Completed),
            "failed" => Ok(OperationStatus::Failed),
            "rolled_back" => Ok(OperationStatus::RolledBack),
            other => Err(RekeyError::Config(format!(
                "unknown operation status in ledger: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationRecord {
    pub operation_id: String,
    pub status: OperationStatus,
    pub metadata: Metadata,
    pub updated_at: String,
}

impl OperationRecord {
    /// Last committed id for `table`, if one was recorded
    pub fn checkpoint(&self, table: &str) -> Option<RowId> {
        self.metadata
            .get(&checkpoint_key(table))
            .and_then(Value::as_i64)
    }
}

pub fn checkpoint_key(table: &str) -> String {
    format!("{CHECKPOINT_PREFIX}{table}")
}

/// Namespace for ledger operations over any connection (or open transaction)
pub struct Ledger;

impl Ledger {
    pub fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {LEDGER_TABLE} (
                operation_id TEXT PRIMARY KEY,
                status       TEXT NOT NULL,
                metadata     TEXT NOT NULL DEFAULT '{{}}',
                updated_at   TEXT NOT NULL
            );
            "#
        ))?;
        Ok(())
    }

    /// True once `ensure_schema` has run against this database
    pub fn has_schema(conn: &Connection) -> Result<bool> {
        let exists = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [LEDGER_TABLE],
            |row| row.get::<_, bool>(0),
        )?;
        Ok(exists)
    }

    /// New record in `pending`. Fails if the id already exists.
    pub fn create(conn: &Connection, operation_id: &str) -> Result<OperationRecord> {
        Self::create_with(conn, operation_id, Metadata::new())
    }

    pub fn create_with(
        conn: &Connection,
        operation_id: &str,
        metadata: Metadata,
    ) -> Result<OperationRecord> {
        if operation_id.trim().is_empty() {
            return Err(RekeyError::Config("operation id must not be empty".into()));
        }
        if Self::get(conn, operation_id)?.is_some() {
            return Err(RekeyError::DuplicateOperation(operation_id.to_string()));
        }

        let record = OperationRecord {
            operation_id: operation_id.to_string(),
            status: OperationStatus::Pending,
            metadata,
            updated_at: now(),
        };
        conn.execute(
            &format!(
                "INSERT INTO {LEDGER_TABLE} (operation_id, status, metadata, updated_at)
                 VALUES (?1, ?2, ?3, ?4)"
            ),
            params![
                record.operation_id,
                record.status.as_str(),
                serde_json::to_string(&record.metadata)?,
                record.updated_at,
            ],
        )?;
        debug!(operation_id, "ledger record created");
        Ok(record)
    }

    pub fn get(conn: &Connection, operation_id: &str) -> Result<Option<OperationRecord>> {
        let raw = conn
            .query_row(
                &format!(
                    "SELECT status, metadata, updated_at FROM {LEDGER_TABLE} WHERE operation_id = ?1"
                ),
                [operation_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((status, metadata, updated_at)) = raw else {
            return Ok(None);
        };
        let metadata: Metadata = match serde_json::from_str(&metadata)? {
            Value::Object(map) => map,
            other => {
                let mut map = Metadata::new();
                map.insert("legacy_metadata".into(), other);
                map
            }
        };

        Ok(Some(OperationRecord {
            operation_id: operation_id.to_string(),
            status: status.parse()?,
            metadata,
            updated_at,
        }))
    }

    /// Move to `status`, merge `patch` into metadata, bump the timestamp
    pub fn advance(
        conn: &Connection,
        operation_id: &str,
        status: OperationStatus,
        patch: Metadata,
    ) -> Result<OperationRecord> {
        let mut record = Self::get(conn, operation_id)?
            .ok_or_else(|| RekeyError::OperationNotFound(operation_id.to_string()))?;

        if !record.status.can_advance_to(status) {
            return Err(RekeyError::InvalidTransition {
                operation_id: operation_id.to_string(),
                from: record.status,
                to: status,
            });
        }

        for (key, value) in patch {
            record.metadata.insert(key, value);
        }
        record.status = status;
        record.updated_at = now();

        conn.execute(
            &format!(
                "UPDATE {LEDGER_TABLE} SET status = ?1, metadata = ?2, updated_at = ?3
                 WHERE operation_id = ?4"
            ),
            params![
                record.status.as_str(),
                serde_json::to_string(&record.metadata)?,
                record.updated_at,
                operation_id,
            ],
        )?;
        debug!(operation_id, status = %record.status, "ledger advanced");
        Ok(record)
    }

    /// Record the committed checkpoint for one table (status stays `in_progress`)
    pub fn checkpoint(
        conn: &Connection,
        operation_id: &str,
        table: &str,
        last_id: RowId,
    ) -> Result<OperationRecord> {
        let mut patch = Metadata::new();
        patch.insert(checkpoint_key(table), Value::from(last_id));
        Self::advance(conn, operation_id, OperationStatus::InProgress, patch)
    }
}

/// Build a metadata patch from `(key, value)` pairs
pub fn patch<I, K, V>(pairs: I) -> Metadata
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
