//! Decision tree version repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Import tree versions with their node graphs.
//! - Flip the active version of a disease in one IMMEDIATE transaction.
//! - Load versions for hydration of the in-memory tree store.
//!
//! # Invariants
//! - Imported versions are always inactive; only `activate` sets the flag.
//! - `import_tree` seals a version in the same transaction as its nodes;
//!   nodes cannot be added to a sealed version and unsealed versions are
//!   never activated.
//! - `activate` verifies structure and `spec_hash` before flipping; a failed
//!   verification leaves the previous active version untouched.
//! - Node lists are returned in import order (`position ASC`).
//!
//! # See also
//! - db/migrations/0002_decision_trees.sql

use crate::db::{is_trigger_abort, DbError, TREE_IMMUTABLE_MESSAGE};
use crate::model::decision_tree::{DecisionTree, TreeNode};
use crate::repo::{ensure_connection_ready, SchemaError, TableShape};
use crate::tree::integrity::{IntegrityError, VerifiedTree};
use crate::tree::structure::validate_tree;
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

const TREE_SELECT_SQL: &str = "SELECT
    disease_id,
    version,
    is_active,
    approved_at,
    spec_hash
FROM decision_trees";

const REQUIRED_TABLES: &[TableShape] = &[
    (
        "decision_trees",
        &[
            "disease_id",
            "version",
            "is_active",
            "approved_at",
            "spec_hash",
            "imported_at",
            "sealed",
        ],
    ),
    (
        "decision_tree_nodes",
        &[
            "disease_id",
            "version",
            "node_id",
            "node_type",
            "position",
            "payload_json",
        ],
    ),
];

pub type TreeRepoResult<T> = Result<T, TreeRepoError>;

#[derive(Debug)]
pub enum TreeRepoError {
    Db(DbError),
    Schema(SchemaError),
    /// Structural or hash verification failed.
    Integrity(IntegrityError),
    DuplicateVersion { disease_id: String, version: u32 },
    VersionNotFound { disease_id: String, version: u32 },
    /// A write tried to change an imported version in place.
    TreeVersionImmutable,
    InvalidData(String),
}

impl Display for TreeRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Schema(err) => write!(f, "{err}"),
            Self::Integrity(err) => write!(f, "{err}"),
            Self::DuplicateVersion {
                disease_id,
                version,
            } => write!(f, "tree {disease_id} v{version} already imported"),
            Self::VersionNotFound {
                disease_id,
                version,
            } => write!(f, "tree {disease_id} v{version} not found"),
            Self::TreeVersionImmutable => {
                write!(f, "tree versions are immutable; import a new version")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted tree data: {message}"),
        }
    }
}

impl Error for TreeRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Schema(err) => Some(err),
            Self::Integrity(err) => Some(err),
            Self::DuplicateVersion { .. }
            | Self::VersionNotFound { .. }
            | Self::TreeVersionImmutable
            | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for TreeRepoError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => err.into(),
            other => Self::Db(other),
        }
    }
}

impl From<rusqlite::Error> for TreeRepoError {
    fn from(value: rusqlite::Error) -> Self {
        if is_trigger_abort(&value, TREE_IMMUTABLE_MESSAGE) {
            return Self::TreeVersionImmutable;
        }
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<SchemaError> for TreeRepoError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

impl From<IntegrityError> for TreeRepoError {
    fn from(value: IntegrityError) -> Self {
        Self::Integrity(value)
    }
}

/// Version metadata without the node graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeVersionSummary {
    pub disease_id: String,
    pub version: u32,
    pub is_active: bool,
    pub approved_at: i64,
    pub spec_hash: String,
    pub node_count: usize,
}

/// Repository interface for decision tree versions.
pub trait TreeVersionRepository {
    /// Stores a new inactive version after structural validation.
    fn import_tree(&self, tree: &DecisionTree) -> TreeRepoResult<()>;
    fn load_tree(&self, disease_id: &str, version: u32) -> TreeRepoResult<Option<DecisionTree>>;
    /// Lists versions of one disease in ascending order.
    fn list_versions(&self, disease_id: &str) -> TreeRepoResult<Vec<TreeVersionSummary>>;
    fn active_version(&self, disease_id: &str) -> TreeRepoResult<Option<u32>>;
    /// Verifies one version and makes it the only active one of its disease.
    fn activate(&self, disease_id: &str, version: u32) -> TreeRepoResult<VerifiedTree>;
    /// Loads every stored version, ordered by disease then version.
    fn load_all_trees(&self) -> TreeRepoResult<Vec<DecisionTree>>;
}

/// SQLite-backed tree version repository.
pub struct SqliteTreeRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTreeRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> TreeRepoResult<Self> {
        ensure_connection_ready::<TreeRepoError>(conn, REQUIRED_TABLES)?;
        Ok(Self { conn })
    }
}

impl TreeVersionRepository for SqliteTreeRepository<'_> {
    fn import_tree(&self, tree: &DecisionTree) -> TreeRepoResult<()> {
        validate_tree(tree).map_err(|reason| IntegrityError::MalformedTree {
            disease_id: tree.disease_id.clone(),
            version: tree.version,
            reason,
        })?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        if version_exists(&tx, &tree.disease_id, tree.version)? {
            return Err(TreeRepoError::DuplicateVersion {
                disease_id: tree.disease_id.clone(),
                version: tree.version,
            });
        }

        tx.execute(
            "INSERT INTO decision_trees (
                disease_id,
                version,
                is_active,
                approved_at,
                spec_hash
            ) VALUES (?1, ?2, 0, ?3, ?4);",
            params![
                tree.disease_id.as_str(),
                tree.version,
                tree.approved_at,
                tree.spec_hash.as_str(),
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO decision_tree_nodes (
                    disease_id,
                    version,
                    node_id,
                    node_type,
                    position,
                    payload_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            )?;
            for (position, node) in tree.nodes.iter().enumerate() {
                let payload = serde_json::to_string(node).map_err(|err| {
                    TreeRepoError::InvalidData(format!("failed to encode node {}: {err}", node.id))
                })?;
                stmt.execute(params![
                    tree.disease_id.as_str(),
                    tree.version,
                    node.id.as_str(),
                    node.kind.type_code(),
                    position as i64,
                    payload,
                ])?;
            }
        }
        tx.execute(
            "UPDATE decision_trees
             SET sealed = 1
             WHERE disease_id = ?1 AND version = ?2;",
            params![tree.disease_id.as_str(), tree.version],
        )?;
        tx.commit()?;

        info!(
            "event=tree_import module=repo status=ok disease_id={} version={} nodes={}",
            tree.disease_id,
            tree.version,
            tree.nodes.len()
        );
        Ok(())
    }

    fn load_tree(&self, disease_id: &str, version: u32) -> TreeRepoResult<Option<DecisionTree>> {
        read_tree(self.conn, disease_id, version)
    }

    fn list_versions(&self, disease_id: &str) -> TreeRepoResult<Vec<TreeVersionSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                t.disease_id,
                t.version,
                t.is_active,
                t.approved_at,
                t.spec_hash,
                (SELECT COUNT(*)
                 FROM decision_tree_nodes n
                 WHERE n.disease_id = t.disease_id AND n.version = t.version)
             FROM decision_trees t
             WHERE t.disease_id = ?1
             ORDER BY t.version ASC;",
        )?;
        let mut rows = stmt.query([disease_id])?;

        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            let node_count: i64 = row.get(5)?;
            items.push(TreeVersionSummary {
                disease_id: row.get(0)?,
                version: row.get(1)?,
                is_active: parse_flag(row.get(2)?, "is_active")?,
                approved_at: row.get(3)?,
                spec_hash: row.get(4)?,
                node_count: usize::try_from(node_count).map_err(|_| {
                    TreeRepoError::InvalidData(format!("invalid node count {node_count}"))
                })?,
            });
        }
        Ok(items)
    }

    fn active_version(&self, disease_id: &str) -> TreeRepoResult<Option<u32>> {
        let version = self
            .conn
            .query_row(
                "SELECT version
                 FROM decision_trees
                 WHERE disease_id = ?1 AND is_active = 1;",
                [disease_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version)
    }

    fn activate(&self, disease_id: &str, version: u32) -> TreeRepoResult<VerifiedTree> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut tree = read_tree(&tx, disease_id, version)?.ok_or_else(|| {
            TreeRepoError::VersionNotFound {
                disease_id: disease_id.to_string(),
                version,
            }
        })?;
        if !version_sealed(&tx, disease_id, version)? {
            return Err(TreeRepoError::InvalidData(format!(
                "tree {disease_id} v{version} was never sealed by import"
            )));
        }
        tree.is_active = true;

        let verified = VerifiedTree::verify(tree).map_err(|err| {
            error!(
                "event=tree_activate module=repo status=error disease_id={} version={} error={}",
                disease_id, version, err
            );
            err
        })?;

        let previous: Option<u32> = tx
            .query_row(
                "SELECT version
                 FROM decision_trees
                 WHERE disease_id = ?1 AND is_active = 1;",
                [disease_id],
                |row| row.get(0),
            )
            .optional()?;
        tx.execute(
            "UPDATE decision_trees
             SET is_active = 0
             WHERE disease_id = ?1 AND is_active = 1;",
            [disease_id],
        )?;
        tx.execute(
            "UPDATE decision_trees
             SET is_active = 1
             WHERE disease_id = ?1 AND version = ?2;",
            params![disease_id, version],
        )?;
        tx.commit()?;

        info!(
            "event=tree_activate module=repo status=ok disease_id={} version={} previous_version={}",
            disease_id,
            version,
            previous.map_or_else(|| "none".to_string(), |value| value.to_string())
        );
        Ok(verified)
    }

    fn load_all_trees(&self) -> TreeRepoResult<Vec<DecisionTree>> {
        let mut stmt = self.conn.prepare(
            "SELECT disease_id, version
             FROM decision_trees
             ORDER BY disease_id ASC, version ASC;",
        )?;
        let keys = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut trees = Vec::with_capacity(keys.len());
        for (disease_id, version) in keys {
            let tree = read_tree(self.conn, &disease_id, version)?.ok_or_else(|| {
                TreeRepoError::InvalidData(format!("tree {disease_id} v{version} vanished"))
            })?;
            trees.push(tree);
        }
        Ok(trees)
    }
}

fn version_exists(conn: &Connection, disease_id: &str, version: u32) -> TreeRepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM decision_trees
            WHERE disease_id = ?1 AND version = ?2
        );",
        params![disease_id, version],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn version_sealed(conn: &Connection, disease_id: &str, version: u32) -> TreeRepoResult<bool> {
    let sealed: i64 = conn.query_row(
        "SELECT sealed
         FROM decision_trees
         WHERE disease_id = ?1 AND version = ?2;",
        params![disease_id, version],
        |row| row.get(0),
    )?;
    parse_flag(sealed, "sealed")
}

fn read_tree(
    conn: &Connection,
    disease_id: &str,
    version: u32,
) -> TreeRepoResult<Option<DecisionTree>> {
    let mut stmt = conn.prepare(&format!(
        "{TREE_SELECT_SQL}
         WHERE disease_id = ?1 AND version = ?2;"
    ))?;
    let mut rows = stmt.query(params![disease_id, version])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let mut tree = parse_tree_row(row)?;
    tree.nodes = read_nodes(conn, disease_id, version)?;
    Ok(Some(tree))
}

fn parse_tree_row(row: &Row<'_>) -> TreeRepoResult<DecisionTree> {
    Ok(DecisionTree {
        disease_id: row.get(0)?,
        version: row.get(1)?,
        is_active: parse_flag(row.get(2)?, "is_active")?,
        approved_at: row.get(3)?,
        spec_hash: row.get(4)?,
        nodes: Vec::new(),
    })
}

fn read_nodes(conn: &Connection, disease_id: &str, version: u32) -> TreeRepoResult<Vec<TreeNode>> {
    let mut stmt = conn.prepare(
        "SELECT node_id, node_type, payload_json
         FROM decision_tree_nodes
         WHERE disease_id = ?1 AND version = ?2
         ORDER BY position ASC;",
    )?;
    let mut rows = stmt.query(params![disease_id, version])?;

    let mut nodes = Vec::new();
    while let Some(row) = rows.next()? {
        let node_id: String = row.get(0)?;
        let node_type: String = row.get(1)?;
        let payload: String = row.get(2)?;
        let node: TreeNode = serde_json::from_str(&payload).map_err(|err| {
            TreeRepoError::InvalidData(format!("node {node_id} payload does not decode: {err}"))
        })?;
        if node.id != node_id || node.kind.type_code() != node_type {
            return Err(TreeRepoError::InvalidData(format!(
                "node {node_id} columns disagree with its payload"
            )));
        }
        nodes.push(node);
    }
    Ok(nodes)
}

fn parse_flag(value: i64, column: &'static str) -> TreeRepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(TreeRepoError::InvalidData(format!(
            "invalid {column} value {other}"
        ))),
    }
}
