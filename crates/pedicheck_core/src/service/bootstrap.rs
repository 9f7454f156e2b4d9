//! Startup wiring from SQLite into shared in-memory state.
//!
//! # Responsibility
//! - Load the sealed reference table and hydrate the tree store before the
//!   assessment service exists.
//!
//! # Invariants
//! - A missing or tampered reference table is fatal; no service is built.
//! - Tampered tree versions are quarantined, not fatal. They are listed in
//!   the returned `HydrationReport`.

use crate::config::{ConfigError, CoreConfig};
use crate::repo::reference_repo::{
    ReferenceRepoError, ReferenceRepository, SqliteReferenceRepository,
};
use crate::repo::tree_repo::{SqliteTreeRepository, TreeRepoError, TreeVersionRepository};
use crate::service::assessment_service::AssessmentService;
use crate::tree::store::{DecisionTreeStore, HydrationReport, TreeStoreError};
use log::{error, info};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

#[derive(Debug)]
pub enum BootstrapError {
    Config(ConfigError),
    Reference(ReferenceRepoError),
    Trees(TreeRepoError),
    TreeStore(TreeStoreError),
}

impl Display for BootstrapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Reference(err) => write!(f, "reference data unavailable: {err}"),
            Self::Trees(err) => write!(f, "decision trees unavailable: {err}"),
            Self::TreeStore(err) => write!(f, "{err}"),
        }
    }
}

impl Error for BootstrapError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Reference(err) => Some(err),
            Self::Trees(err) => Some(err),
            Self::TreeStore(err) => Some(err),
        }
    }
}

impl From<ConfigError> for BootstrapError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<ReferenceRepoError> for BootstrapError {
    fn from(value: ReferenceRepoError) -> Self {
        Self::Reference(value)
    }
}

impl From<TreeRepoError> for BootstrapError {
    fn from(value: TreeRepoError) -> Self {
        Self::Trees(value)
    }
}

impl From<TreeStoreError> for BootstrapError {
    fn from(value: TreeStoreError) -> Self {
        Self::TreeStore(value)
    }
}

/// Builds an `AssessmentService` from a migrated connection.
pub fn bootstrap_service(
    conn: &Connection,
    config: &CoreConfig,
) -> Result<(AssessmentService, HydrationReport), BootstrapError> {
    config.validate()?;

    let reference = SqliteReferenceRepository::try_new(conn)?
        .load_table()
        .map_err(|err| {
            error!(
                "event=bootstrap module=service status=error stage=reference error={}",
                err
            );
            err
        })?;

    let trees = Arc::new(DecisionTreeStore::new());
    let stored = SqliteTreeRepository::try_new(conn)?.load_all_trees()?;
    let report = trees.hydrate(stored)?;

    let service = AssessmentService::new(Arc::new(reference), trees, config)?;
    info!(
        "event=bootstrap module=service status=ok trees_registered={} trees_active={} trees_rejected={}",
        report.registered,
        report.activated.len(),
        report.rejected.len()
    );
    Ok((service, report))
}
