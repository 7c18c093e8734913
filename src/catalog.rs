// src/catalog.rs
//! Which tables and columns hold encrypted PII
//!
//! Compiled-in, immutable during a run. Every SQL statement the walker and
//! engine issue is derived from these entries; identifiers are validated
//! here and quoted at use, values are always bound parameters.

use std::collections::HashSet;

use rusqlite::Connection;

use crate::error::{RekeyError, Result};

/// One table's encrypted columns plus its stable, sortable row id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub table: &'static str,
    pub fields: &'static [&'static str],
    pub id_column: &'static str,
}

/// Tables whose PII is stored ciphertext-only
pub const PII_CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        table: "contacts",
        fields: &["email", "phone", "street_address", "date_of_birth"],
        id_column: "id",
    },
    CatalogEntry {
        table: "companies",
        fields: &["tax_id", "bank_account", "billing_email"],
        id_column: "id",
    },
    CatalogEntry {
        table: "user_credentials",
        fields: &["totp_secret", "recovery_email", "recovery_phone"],
        id_column: "id",
    },
];

#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn builtin() -> Self {
        Self {
            entries: PII_CATALOG.to_vec(),
        }
    }

    /// Custom catalog (embedders, tests). Rejects malformed identifiers.
    pub fn new(entries: Vec<CatalogEntry>) -> Result<Self> {
        let catalog = Self { entries };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Ordered list of `{table, fields, id_column}`
    pub fn describe(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn validate(&self) -> Result<()> {
        let mut tables = HashSet::new();
        for entry in &self.entries {
            check_ident(entry.table)?;
            check_ident(entry.id_column)?;
            if !tables.insert(entry.table) {
                return Err(RekeyError::Config(format!(
                    "table {} listed twice in catalog",
                    entry.table
                )));
            }
            if entry.fields.is_empty() {
                return Err(RekeyError::Config(format!(
                    "table {} has no encrypted fields",
                    entry.table
                )));
            }
            let mut seen = HashSet::new();
            for field in entry.fields {
                check_ident(field)?;
                if *field == entry.id_column {
                    return Err(RekeyError::Config(format!(
                        "{}.{} cannot be both id column and encrypted field",
                        entry.table, field
                    )));
                }
                if !seen.insert(*field) {
                    return Err(RekeyError::Config(format!(
                        "duplicate field {}.{}",
                        entry.table, field
                    )));
                }
            }
        }
        Ok(())
    }

    /// Confirm every cataloged table and column exists in the live schema
    pub fn verify_schema(&self, conn: &Connection) -> Result<()> {
        for entry in &self.entries {
            let columns = table_columns(conn, entry.table)?;
            if columns.is_empty() {
                return Err(RekeyError::Config(format!(
                    "table {} does not exist",
                    entry.table
                )));
            }
            for column in std::iter::once(&entry.id_column).chain(entry.fields.iter()) {
                if !columns.contains(*column) {
                    return Err(RekeyError::Config(format!(
                        "column {}.{} does not exist",
                        entry.table, column
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn table_columns(conn: &Connection, table: &str) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let names = stmt
        .query_map([table], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(names)
}

fn check_ident(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(RekeyError::Config(format!("invalid SQL identifier: {name:?}")))
    }
}

/// Double-quote an already-validated identifier
pub(crate) fn quote(name: &str) -> String {
    format!("\"{name}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_valid() {
        let catalog = Catalog::builtin();
        catalog.validate().unwrap();
        assert_eq!(catalog.describe().len(), 3);
        assert_eq!(catalog.describe()[0].table, "contacts");
    }

    #[test]
    fn rejects_injection_shaped_identifiers() {
        let bad = CatalogEntry {
            table: "contacts; DROP TABLE users",
            fields: &["email"],
            id_column: "id",
        };
        assert!(matches!(Catalog::new(vec![bad]), Err(RekeyError::Config(_))));
    }

    #[test]
    fn rejects_duplicates_and_empty_fields() {
        let dup = CatalogEntry {
            table: "t",
            fields: &["a", "a"],
            id_column: "id",
        };
        assert!(Catalog::new(vec![dup]).is_err());

        let empty = CatalogEntry {
            table: "t",
            fields: &[],
            id_column: "id",
        };
        assert!(Catalog::new(vec![empty]).is_err());
    }

    #[test]
    fn verify_schema_reports_missing_column() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, a BLOB);")
            .unwrap();

        let ok = Catalog::new(vec![CatalogEntry {
            table: "t",
            fields: &["a"],
            id_column: "id",
        }])
        .unwrap();
        ok.verify_schema(&conn).unwrap();

        let missing = Catalog::new(vec![CatalogEntry {
            table: "t",
            fields: &["a", "b"],
            id_column: "id",
        }])
        .unwrap();
        let err = missing.verify_schema(&conn).unwrap_err();
        assert!(err.to_string().contains("t.b"));
    }
}
