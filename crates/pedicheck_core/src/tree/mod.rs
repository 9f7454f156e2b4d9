//! Clinical decision tree subsystem.
//!
//! # Responsibility
//! - Validate and hash-verify tree versions.
//! - Keep the active version per disease.
//! - Traverse a verified tree to an outcome.
//!
//! # See also
//! - model/decision_tree.rs
//! - repo/tree_repo.rs

pub mod engine;
pub mod integrity;
pub mod store;
pub mod structure;
