//! Domain model for growth assessment and clinical triage.
//!
//! # Responsibility
//! - Define canonical data structures shared by the z-score engine, the
//!   decision tree engine and persistence adapters.
//!
//! # Invariants
//! - Reference rows and tree versions are immutable once loaded.
//! - Session snapshots are read-only inputs; the core never mutates them.
//!
//! # See also
//! - db/migrations/0001_growth_reference.sql
//! - db/migrations/0002_decision_trees.sql

pub mod decision_tree;
pub mod growth;
pub mod session;
