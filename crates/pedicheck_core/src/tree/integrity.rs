//! Decision tree integrity verification.
//!
//! # Responsibility
//! - Render a node set into its canonical serialization.
//! - Compute and verify the SHA-256 `spec_hash` binding a version to content.
//! - Produce `VerifiedTree`, the only tree shape the engine accepts.
//!
//! # Invariants
//! - Canonical form is independent of node order, object key order and
//!   insignificant whitespace inside strings.
//! - A `VerifiedTree` always passed structural validation and hash comparison.

use crate::model::decision_tree::{DecisionTree, NodeKind, TreeNode};
use crate::tree::structure::{validate_tree, TreeValidationError};
use log::{debug, error};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    /// Graph shape or metadata is invalid.
    MalformedTree {
        disease_id: String,
        version: u32,
        reason: TreeValidationError,
    },
    /// Stored hash does not match the recomputed content hash.
    SpecHashMismatch {
        disease_id: String,
        version: u32,
        expected: String,
        actual: String,
    },
    /// Nodes could not be rendered to JSON.
    Serialization(String),
}

impl Display for IntegrityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedTree {
                disease_id,
                version,
                reason,
            } => write!(f, "malformed tree {disease_id} v{version}: {reason}"),
            Self::SpecHashMismatch {
                disease_id,
                version,
                expected,
                actual,
            } => write!(
                f,
                "spec hash mismatch for {disease_id} v{version}: stored {expected}, computed {actual}"
            ),
            Self::Serialization(message) => {
                write!(f, "failed to serialize tree nodes: {message}")
            }
        }
    }
}

impl Error for IntegrityError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MalformedTree { reason, .. } => Some(reason),
            Self::SpecHashMismatch { .. } | Self::Serialization(_) => None,
        }
    }
}

/// Renders nodes into the canonical string the spec hash is computed over.
pub fn canonical_serialization(nodes: &[TreeNode]) -> Result<String, IntegrityError> {
    let mut sorted: Vec<&TreeNode> = nodes.iter().collect();
    sorted.sort_by(|left, right| left.id.cmp(&right.id));

    let mut rendered = Vec::with_capacity(sorted.len());
    for node in sorted {
        let value = serde_json::to_value(node)
            .map_err(|err| IntegrityError::Serialization(err.to_string()))?;
        rendered.push(normalize_whitespace(value));
    }

    // `serde_json::Map` keeps keys sorted, so `to_string` is key-order stable.
    serde_json::to_string(&Value::Array(rendered))
        .map_err(|err| IntegrityError::Serialization(err.to_string()))
}

/// Computes the lowercase hex SHA-256 spec hash of a node set.
pub fn compute_spec_hash(nodes: &[TreeNode]) -> Result<String, IntegrityError> {
    let canonical = canonical_serialization(nodes)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

/// Recomputes the content hash and compares it with `tree.spec_hash`.
pub fn verify_spec_hash(tree: &DecisionTree) -> Result<(), IntegrityError> {
    let actual = compute_spec_hash(&tree.nodes)?;
    if actual == tree.spec_hash {
        debug!(
            "event=tree_verify module=tree status=ok disease_id={} version={}",
            tree.disease_id, tree.version
        );
        return Ok(());
    }

    error!(
        "event=tree_verify module=tree status=error error_code=spec_hash_mismatch disease_id={} version={}",
        tree.disease_id, tree.version
    );
    Err(IntegrityError::SpecHashMismatch {
        disease_id: tree.disease_id.clone(),
        version: tree.version,
        expected: tree.spec_hash.clone(),
        actual,
    })
}

/// Tree version whose structure and content hash were verified.
///
/// Constructed only through [`VerifiedTree::verify`].
#[derive(Debug, Clone)]
pub struct VerifiedTree {
    tree: DecisionTree,
    index: HashMap<String, usize>,
    entry: usize,
}

impl VerifiedTree {
    /// Validates structure, then verifies the spec hash.
    pub fn verify(tree: DecisionTree) -> Result<Self, IntegrityError> {
        validate_tree(&tree).map_err(|reason| IntegrityError::MalformedTree {
            disease_id: tree.disease_id.clone(),
            version: tree.version,
            reason,
        })?;
        verify_spec_hash(&tree)?;

        let index: HashMap<String, usize> = tree
            .nodes
            .iter()
            .enumerate()
            .map(|(position, node)| (node.id.clone(), position))
            .collect();
        let entry = tree
            .nodes
            .iter()
            .position(|node| matches!(node.kind, NodeKind::EntryGate(_)))
            .ok_or_else(|| IntegrityError::MalformedTree {
                disease_id: tree.disease_id.clone(),
                version: tree.version,
                reason: TreeValidationError::MissingEntryGate,
            })?;

        Ok(Self { tree, index, entry })
    }

    pub fn tree(&self) -> &DecisionTree {
        &self.tree
    }

    pub fn disease_id(&self) -> &str {
        &self.tree.disease_id
    }

    pub fn version(&self) -> u32 {
        self.tree.version
    }

    pub fn spec_hash(&self) -> &str {
        &self.tree.spec_hash
    }

    pub fn entry(&self) -> &TreeNode {
        &self.tree.nodes[self.entry]
    }

    pub fn node(&self, id: &str) -> Option<&TreeNode> {
        self.index.get(id).map(|position| &self.tree.nodes[*position])
    }

    pub fn len(&self) -> usize {
        self.tree.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.nodes.is_empty()
    }
}

fn normalize_whitespace(value: Value) -> Value {
    match value {
        Value::String(text) => Value::String(collapse(&text)),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_whitespace).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, item)| (collapse(&key), normalize_whitespace(item)))
                .collect(),
        ),
        other => other,
    }
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
