//! Repository layer for clinical reference data and tree versions.
//!
//! # Responsibility
//! - Keep SQL details out of the engines and the assessment service.
//! - Map trigger aborts to semantic errors (`ReferenceTableLocked`,
//!   `TreeVersionImmutable`).
//!
//! # Invariants
//! - Repositories refuse connections whose schema is not fully migrated.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::migrations::latest_version;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod reference_repo;
pub mod tree_repo;

/// Connection is not ready for repository use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "repository requires column `{column}` in table `{table}`"
            ),
        }
    }
}

impl Error for SchemaError {}

/// Required table and the columns a repository reads or writes.
pub(crate) type TableShape = (&'static str, &'static [&'static str]);

pub(crate) fn ensure_connection_ready<E>(conn: &Connection, tables: &[TableShape]) -> Result<(), E>
where
    E: From<SchemaError> + From<rusqlite::Error>,
{
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(SchemaError::UninitializedConnection {
            expected_version,
            actual_version,
        }
        .into());
    }

    for &(table, columns) in tables {
        if !table_exists(conn, table)? {
            return Err(SchemaError::MissingRequiredTable(table).into());
        }
        for &column in columns {
            if !table_has_column(conn, table, column)? {
                return Err(SchemaError::MissingRequiredColumn { table, column }.into());
            }
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
