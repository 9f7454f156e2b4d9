//! SQLite storage bootstrap and schema migration entry points.
//!
//! # Responsibility
//! - Open and configure SQLite connections for reference and tree storage.
//! - Apply schema migrations, including the immutability triggers, in
//!   deterministic order.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Repositories must not touch clinical data before migrations succeed.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

/// Trigger message raised on any illegal reference-table write.
pub const REFERENCE_LOCKED_MESSAGE: &str = "reference_table_locked";
/// Trigger message raised on any in-place change of a tree version.
pub const TREE_IMMUTABLE_MESSAGE: &str = "tree_version_immutable";

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// The compiled-in migration list is not contiguous from version 1.
    MigrationOrder { expected: u32, found: u32 },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::MigrationOrder { expected, found } => {
                write!(f, "migration registry out of order: expected v{expected}, found v{found}")
            }
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } | Self::MigrationOrder { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Returns whether `err` was raised by a trigger with `message`.
pub fn is_trigger_abort(err: &rusqlite::Error, message: &str) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(detail)) => detail.contains(message),
        _ => false,
    }
}
