use pedicheck_core::db::migrations::latest_version;
use pedicheck_core::db::{open_db, open_db_in_memory, DbError};
use pedicheck_core::repo::reference_repo::{ReferenceRepoError, SqliteReferenceRepository};
use pedicheck_core::repo::tree_repo::{SqliteTreeRepository, TreeRepoError};
use pedicheck_core::repo::SchemaError;
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "growth_reference");
    assert_table_exists(&conn, "reference_seal");
    assert_table_exists(&conn, "decision_trees");
    assert_table_exists(&conn, "decision_tree_nodes");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pedicheck.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "decision_trees");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    match open_db(&path).unwrap_err() {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn repositories_reject_unmigrated_connections() {
    let raw = Connection::open_in_memory().unwrap();

    assert!(matches!(
        SqliteReferenceRepository::try_new(&raw),
        Err(ReferenceRepoError::Schema(
            SchemaError::UninitializedConnection {
                actual_version: 0,
                ..
            }
        ))
    ));
    assert!(matches!(
        SqliteTreeRepository::try_new(&raw),
        Err(TreeRepoError::Schema(SchemaError::UninitializedConnection { .. }))
    ));
}

#[test]
fn foreign_keys_are_enforced_for_tree_nodes() {
    let conn = open_db_in_memory().unwrap();
    let err = conn
        .execute(
            "INSERT INTO decision_tree_nodes (
                disease_id, version, node_id, node_type, position, payload_json
            ) VALUES ('ghost', 1, 'n', 'OUTCOME', 0, '{}');",
            [],
        )
        .unwrap_err();
    assert!(err.to_string().contains("FOREIGN KEY"));
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
