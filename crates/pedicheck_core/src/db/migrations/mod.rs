//! SQLite migration registry and executor.
//!
//! # Responsibility
//! - Keep the ordered list of schema migrations shipped with the crate.
//! - Bring a connection from its `PRAGMA user_version` to the latest schema in
//!   one transaction.
//!
//! # Invariants
//! - Registered versions are contiguous from 1; a gap or reordering is
//!   reported as `DbError::MigrationOrder` before any SQL runs.
//! - Applied migration version is mirrored to `PRAGMA user_version`.
//! - Immutability triggers ship in the same migration as their table.

use crate::db::{DbError, DbResult};
use log::{debug, info};
use rusqlite::Connection;

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "growth_reference",
        sql: include_str!("0001_growth_reference.sql"),
    },
    Migration {
        version: 2,
        name: "decision_trees",
        sql: include_str!("0002_decision_trees.sql"),
    },
];

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS
        .iter()
        .map(|migration| migration.version)
        .max()
        .unwrap_or(0)
}

/// Applies all pending migrations on the provided connection.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    check_order(MIGRATIONS)?;
    migrate_to(conn, MIGRATIONS, latest_version())
}

/// Reads `PRAGMA user_version`.
pub fn current_user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

fn check_order(migrations: &[Migration]) -> DbResult<()> {
    for (position, migration) in migrations.iter().enumerate() {
        let expected = u32::try_from(position + 1).unwrap_or(u32::MAX);
        if migration.version != expected {
            return Err(DbError::MigrationOrder {
                expected,
                found: migration.version,
            });
        }
    }
    Ok(())
}

fn migrate_to(conn: &mut Connection, migrations: &[Migration], target: u32) -> DbResult<()> {
    let current_version = current_user_version(conn)?;
    if current_version > target {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current_version,
            latest_supported: target,
        });
    }
    if current_version == target {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in migrations
        .iter()
        .filter(|migration| migration.version > current_version && migration.version <= target)
    {
        tx.execute_batch(migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
        debug!(
            "event=db_migrate_step module=db status=ok version={} name={}",
            migration.version, migration.name
        );
    }
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from_version={} to_version={}",
        current_version, target
    );
    Ok(())
}
