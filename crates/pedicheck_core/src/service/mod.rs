//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate calculator, classifier and tree engine into one assessment.
//! - Wire persisted reference data and tree versions into in-memory state.

pub mod assessment_service;
pub mod bootstrap;
