//! Growth-standard z-score engine.
//!
//! # Responsibility
//! - Hold the sealed reference table and compute classified z-scores from it.
//!
//! # See also
//! - model/growth.rs
//! - repo/reference_repo.rs

pub mod reference_table;
pub mod zscore;
