//! In-memory decision tree store.
//!
//! # Responsibility
//! - Hold every registered tree version per disease.
//! - Track the single active, verified version per disease.
//! - Hydrate from persisted trees, quarantining actives that fail verification.
//!
//! # Invariants
//! - At most one active version per disease.
//! - Only `VerifiedTree`s are ever handed out as active.
//! - Activation is one write-locked swap; readers see either the old or the
//!   new active version, never a partial state.

use crate::model::decision_tree::DecisionTree;
use crate::tree::integrity::{IntegrityError, VerifiedTree};
use crate::tree::structure::validate_tree;
use log::{error, info, warn};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeStoreError {
    Integrity(IntegrityError),
    DuplicateVersion { disease_id: String, version: u32 },
    VersionNotFound { disease_id: String, version: u32 },
    NoActiveTree { disease_id: String },
}

impl Display for TreeStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integrity(err) => write!(f, "{err}"),
            Self::DuplicateVersion {
                disease_id,
                version,
            } => write!(f, "tree {disease_id} v{version} already registered"),
            Self::VersionNotFound {
                disease_id,
                version,
            } => write!(f, "tree {disease_id} v{version} not found"),
            Self::NoActiveTree { disease_id } => {
                write!(f, "no active decision tree for {disease_id}")
            }
        }
    }
}

impl Error for TreeStoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Integrity(err) => Some(err),
            _ => None,
        }
    }
}

impl From<IntegrityError> for TreeStoreError {
    fn from(value: IntegrityError) -> Self {
        Self::Integrity(value)
    }
}

/// Summary of one `hydrate` call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HydrationReport {
    pub registered: usize,
    pub activated: Vec<(String, u32)>,
    /// Versions that failed validation or verification; none of them is served.
    pub rejected: Vec<IntegrityError>,
}

#[derive(Debug, Default)]
struct DiseaseTrees {
    versions: BTreeMap<u32, Arc<DecisionTree>>,
    active: Option<Arc<VerifiedTree>>,
    /// Why the version persisted as active is not being served.
    rejected_active: Option<IntegrityError>,
}

/// Thread-safe registry of tree versions keyed by disease.
#[derive(Debug, Default)]
pub struct DecisionTreeStore {
    diseases: RwLock<BTreeMap<String, DiseaseTrees>>,
}

impl DecisionTreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one tree version as inactive.
    ///
    /// The stored `is_active` flag of the input is ignored; use `activate`.
    pub fn register(&self, mut tree: DecisionTree) -> Result<(), TreeStoreError> {
        validate_tree(&tree).map_err(|reason| IntegrityError::MalformedTree {
            disease_id: tree.disease_id.clone(),
            version: tree.version,
            reason,
        })?;
        tree.is_active = false;

        let mut diseases = self.diseases.write().unwrap_or_else(PoisonError::into_inner);
        let entry = diseases.entry(tree.disease_id.clone()).or_default();
        if entry.versions.contains_key(&tree.version) {
            return Err(TreeStoreError::DuplicateVersion {
                disease_id: tree.disease_id,
                version: tree.version,
            });
        }

        info!(
            "event=tree_register module=tree status=ok disease_id={} version={} nodes={}",
            tree.disease_id,
            tree.version,
            tree.nodes.len()
        );
        entry.versions.insert(tree.version, Arc::new(tree));
        Ok(())
    }

    /// Verifies one version and makes it the only active version of its disease.
    ///
    /// On `SpecHashMismatch` the previous active version stays active.
    pub fn activate(
        &self,
        disease_id: &str,
        version: u32,
    ) -> Result<Arc<VerifiedTree>, TreeStoreError> {
        let candidate = {
            let diseases = self.diseases.read().unwrap_or_else(PoisonError::into_inner);
            diseases
                .get(disease_id)
                .and_then(|entry| entry.versions.get(&version))
                .cloned()
                .ok_or_else(|| TreeStoreError::VersionNotFound {
                    disease_id: disease_id.to_string(),
                    version,
                })?
        };

        let mut verified_copy = (*candidate).clone();
        verified_copy.is_active = true;
        let verified = Arc::new(VerifiedTree::verify(verified_copy)?);

        let mut diseases = self.diseases.write().unwrap_or_else(PoisonError::into_inner);
        let entry = diseases.entry(disease_id.to_string()).or_default();
        let previous = entry.active.replace(Arc::clone(&verified));
        entry.rejected_active = None;

        info!(
            "event=tree_activate module=tree status=ok disease_id={} version={} previous_version={}",
            disease_id,
            version,
            previous.map_or_else(|| "none".to_string(), |tree| tree.version().to_string())
        );
        Ok(verified)
    }

    /// Returns the active verified tree for a disease in one consistent read.
    pub fn active_tree(&self, disease_id: &str) -> Result<Arc<VerifiedTree>, TreeStoreError> {
        let diseases = self.diseases.read().unwrap_or_else(PoisonError::into_inner);
        let entry = diseases
            .get(disease_id)
            .ok_or_else(|| TreeStoreError::NoActiveTree {
                disease_id: disease_id.to_string(),
            })?;

        if let Some(active) = &entry.active {
            return Ok(Arc::clone(active));
        }
        match &entry.rejected_active {
            Some(err) => Err(TreeStoreError::Integrity(err.clone())),
            None => Err(TreeStoreError::NoActiveTree {
                disease_id: disease_id.to_string(),
            }),
        }
    }

    /// Returns the active version number, if any.
    pub fn active_version(&self, disease_id: &str) -> Option<u32> {
        self.active_tree(disease_id).ok().map(|tree| tree.version())
    }

    /// Lists registered versions of one disease in ascending order.
    pub fn versions(&self, disease_id: &str) -> Vec<u32> {
        let diseases = self.diseases.read().unwrap_or_else(PoisonError::into_inner);
        diseases
            .get(disease_id)
            .map(|entry| entry.versions.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Lists disease ids that currently serve an active tree.
    pub fn active_diseases(&self) -> Vec<String> {
        let diseases = self.diseases.read().unwrap_or_else(PoisonError::into_inner);
        diseases
            .iter()
            .filter(|(_, entry)| entry.active.is_some())
            .map(|(disease_id, _)| disease_id.clone())
            .collect()
    }

    /// Registers persisted trees and re-activates those stored as active.
    ///
    /// A stored-active tree that fails verification is kept inactive and
    /// reported; lookups for its disease then fail with the integrity error.
    pub fn hydrate(
        &self,
        trees: impl IntoIterator<Item = DecisionTree>,
    ) -> Result<HydrationReport, TreeStoreError> {
        let mut report = HydrationReport::default();
        let mut to_activate = Vec::new();

        for tree in trees {
            let key = (tree.disease_id.clone(), tree.version);
            let was_active = tree.is_active;
            match self.register(tree) {
                Ok(()) => report.registered += 1,
                Err(TreeStoreError::Integrity(err)) => {
                    if was_active {
                        self.reject_active(&key.0, err.clone());
                    }
                    report.rejected.push(err);
                    continue;
                }
                Err(err) => return Err(err),
            }
            if was_active {
                to_activate.push(key);
            }
        }

        for (disease_id, version) in to_activate {
            match self.activate(&disease_id, version) {
                Ok(_) => report.activated.push((disease_id, version)),
                Err(TreeStoreError::Integrity(err)) => {
                    self.reject_active(&disease_id, err.clone());
                    report.rejected.push(err);
                }
                Err(err) => return Err(err),
            }
        }

        if report.rejected.is_empty() {
            info!(
                "event=tree_hydrate module=tree status=ok registered={} activated={}",
                report.registered,
                report.activated.len()
            );
        } else {
            warn!(
                "event=tree_hydrate module=tree status=degraded registered={} activated={} rejected={}",
                report.registered,
                report.activated.len(),
                report.rejected.len()
            );
        }
        Ok(report)
    }

    fn reject_active(&self, disease_id: &str, err: IntegrityError) {
        error!(
            "event=tree_quarantine module=tree status=error disease_id={} error={}",
            disease_id, err
        );
        let mut diseases = self.diseases.write().unwrap_or_else(PoisonError::into_inner);
        let entry = diseases.entry(disease_id.to_string()).or_default();
        entry.active = None;
        entry.rejected_active = Some(err);
    }
}
