//! Versioned clinical decision tree model.
//!
//! # Responsibility
//! - Define the tagged node union (`ENTRY_GATE | QUESTION | BRANCH | OUTCOME`)
//!   and the predicates branches evaluate.
//! - Provide successor enumeration used by structural validation.
//!
//! # Invariants
//! - A tree version is never mutated after import; corrections create a new
//!   version with a new `spec_hash`.
//! - `spec_hash` binds the version to its exact node content.

use crate::model::growth::{Indicator, NutritionBand};
use crate::vitals::{NoiseBand, Spo2Band, TemperatureBand};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stable node identifier, unique within one tree version.
pub type NodeId = String;

/// One versioned triage tree for a disease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub disease_id: String,
    pub version: u32,
    pub is_active: bool,
    /// Unix epoch milliseconds of clinical approval.
    pub approved_at: i64,
    /// Lowercase hex SHA-256 of the canonical node serialization.
    pub spec_hash: String,
    pub nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: NodeId,
    #[serde(flatten)]
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    EntryGate(QuestionStep),
    Question(QuestionStep),
    Branch(BranchStep),
    Outcome(OutcomeStep),
}

impl NodeKind {
    /// Storage/wire code of the node kind.
    pub fn type_code(&self) -> &'static str {
        match self {
            Self::EntryGate(_) => "ENTRY_GATE",
            Self::Question(_) => "QUESTION",
            Self::Branch(_) => "BRANCH",
            Self::Outcome(_) => "OUTCOME",
        }
    }
}

impl TreeNode {
    /// Returns every successor id this node can transition to.
    pub fn successors(&self) -> Vec<&str> {
        match &self.kind {
            NodeKind::EntryGate(step) | NodeKind::Question(step) => match &step.next {
                Transition::Always { next } => vec![next.as_str()],
                Transition::ByAnswer { routes, fallback } => routes
                    .values()
                    .chain(fallback.iter())
                    .map(String::as_str)
                    .collect(),
            },
            NodeKind::Branch(step) => step
                .arms
                .iter()
                .map(|arm| arm.next.as_str())
                .chain(std::iter::once(step.otherwise.as_str()))
                .collect(),
            NodeKind::Outcome(_) => Vec::new(),
        }
    }
}

/// Question asked of the caregiver; answered through `answers[answer_key]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionStep {
    pub answer_key: String,
    pub prompt: String,
    pub next: Transition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    /// The answer must be present but its value does not steer traversal.
    Always { next: NodeId },
    /// Answer value (trimmed, case-insensitive) selects the successor.
    ByAnswer {
        routes: BTreeMap<String, NodeId>,
        #[serde(default)]
        fallback: Option<NodeId>,
    },
}

/// Ordered predicate arms; the first arm that holds wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchStep {
    pub arms: Vec<BranchArm>,
    pub otherwise: NodeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchArm {
    pub when: Predicate,
    pub next: NodeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeStep {
    pub diagnosis: String,
    pub severity: Severity,
    #[serde(default)]
    pub advice: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Mild,
    Moderate,
    Severe,
    Emergency,
}

/// Condition a `BRANCH` node evaluates against session inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    TemperatureIn { bands: Vec<TemperatureBand> },
    HeartRateOutOfRange,
    Spo2In { bands: Vec<Spo2Band> },
    NoiseIn { bands: Vec<NoiseBand> },
    NutritionIn {
        indicator: Indicator,
        bands: Vec<NutritionBand>,
    },
    Threshold {
        signal: Signal,
        cmp: Comparison,
        value: f64,
    },
    AnswerEquals { key: String, value: String },
    All { of: Vec<Predicate> },
    Any { of: Vec<Predicate> },
    Not { of: Box<Predicate> },
}

/// Numeric session value a threshold predicate reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    TemperatureC,
    HeartRateBpm,
    Spo2Pct,
    NoiseDb,
    WeightKg,
    HeightCm,
    AgeDays,
    ZScore(Indicator),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    pub fn holds(self, left: f64, right: f64) -> bool {
        match self {
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Gt => left > right,
            Self::Ge => left >= right,
        }
    }
}

/// Normalizes an answer value or route key for matching.
pub fn normalize_answer(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
