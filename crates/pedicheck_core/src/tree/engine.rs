//! Decision tree traversal.
//!
//! # Responsibility
//! - Walk a verified tree from its entry gate to an outcome using one
//!   immutable session snapshot.
//!
//! # Invariants
//! - Traversal is synchronous and deterministic: the same tree version and
//!   inputs always produce the same outcome.
//! - Missing answers are never defaulted.
//! - Traversal is bounded by `max(max_steps, node count)`. A verified tree is
//!   acyclic, so every valid path fits; exceeding the bound is fatal.

use crate::model::decision_tree::{
    normalize_answer, NodeId, NodeKind, OutcomeStep, Predicate, QuestionStep, Severity, Signal,
    Transition, TreeNode,
};
use crate::model::session::SessionInputs;
use crate::tree::integrity::VerifiedTree;
use crate::vitals::RangeStatus;
use log::debug;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Default step budget per evaluation; trees with more nodes get one step per node.
pub const DEFAULT_MAX_TRAVERSAL_STEPS: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationError {
    /// A node needs an answer the caller did not supply.
    MissingAnswer { node_id: NodeId, answer_key: String },
    /// The answer matches no route and the node has no fallback.
    UnexpectedAnswer {
        node_id: NodeId,
        answer_key: String,
        answer: String,
    },
    /// A predicate reads a z-score that was not evaluated for the session.
    MissingSignal { node_id: NodeId, signal: String },
    /// Traversal could not reach an outcome within the step bound.
    UnreachableOutcome {
        disease_id: String,
        version: u32,
        node_id: NodeId,
        steps: usize,
    },
}

impl Display for EvaluationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingAnswer {
                node_id,
                answer_key,
            } => write!(f, "node {node_id} requires answer `{answer_key}`"),
            Self::UnexpectedAnswer {
                node_id,
                answer_key,
                answer,
            } => write!(
                f,
                "node {node_id} has no route for answer `{answer}` to `{answer_key}`"
            ),
            Self::MissingSignal { node_id, signal } => {
                write!(f, "node {node_id} reads unavailable signal {signal}")
            }
            Self::UnreachableOutcome {
                disease_id,
                version,
                node_id,
                steps,
            } => write!(
                f,
                "no outcome reached in {disease_id} v{version} after {steps} steps (last node {node_id})"
            ),
        }
    }
}

impl Error for EvaluationError {}

/// Terminal result of one traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub disease_id: String,
    pub tree_version: u32,
    pub spec_hash: String,
    pub node_id: NodeId,
    pub diagnosis: String,
    pub severity: Severity,
    pub advice: Option<String>,
    /// Visited node ids, entry gate first, outcome last.
    pub path: Vec<NodeId>,
}

/// Stateless traversal engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionTreeEngine {
    max_steps: usize,
}

impl Default for DecisionTreeEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRAVERSAL_STEPS)
    }
}

impl DecisionTreeEngine {
    pub fn new(max_steps: usize) -> Self {
        Self {
            max_steps: max_steps.max(1),
        }
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Walks `tree` from its entry gate until an outcome is reached.
    pub fn evaluate(
        &self,
        tree: &VerifiedTree,
        inputs: &SessionInputs,
    ) -> Result<Outcome, EvaluationError> {
        let mut current = tree.entry();
        let mut path = Vec::new();
        let budget = self.max_steps.max(tree.len());

        for _ in 0..budget {
            path.push(current.id.clone());
            let next_id = match &current.kind {
                NodeKind::EntryGate(step) | NodeKind::Question(step) => {
                    answer_successor(current, step, inputs)?
                }
                NodeKind::Branch(step) => {
                    let mut selected = step.otherwise.as_str();
                    for arm in &step.arms {
                        if predicate_holds(current, &arm.when, inputs)? {
                            selected = arm.next.as_str();
                            break;
                        }
                    }
                    selected
                }
                NodeKind::Outcome(step) => {
                    debug!(
                        "event=tree_evaluate module=tree status=ok disease_id={} version={} outcome={} steps={}",
                        tree.disease_id(),
                        tree.version(),
                        current.id,
                        path.len()
                    );
                    return Ok(outcome(tree, current, step, path));
                }
            };

            current = tree.node(next_id).ok_or_else(|| unreachable(tree, current, path.len()))?;
        }

        Err(unreachable(tree, current, path.len()))
    }
}

/// Evaluates with the default step bound.
pub fn evaluate(tree: &VerifiedTree, inputs: &SessionInputs) -> Result<Outcome, EvaluationError> {
    DecisionTreeEngine::default().evaluate(tree, inputs)
}

fn answer_successor<'t>(
    node: &TreeNode,
    step: &'t QuestionStep,
    inputs: &SessionInputs,
) -> Result<&'t str, EvaluationError> {
    let answer = inputs
        .answer(&step.answer_key)
        .ok_or_else(|| EvaluationError::MissingAnswer {
            node_id: node.id.clone(),
            answer_key: step.answer_key.clone(),
        })?;

    match &step.next {
        Transition::Always { next } => Ok(next.as_str()),
        Transition::ByAnswer { routes, fallback } => {
            let normalized = normalize_answer(answer);
            routes
                .iter()
                .find(|(route, _)| normalize_answer(route) == normalized)
                .map(|(_, next)| next.as_str())
                .or(fallback.as_deref())
                .ok_or_else(|| EvaluationError::UnexpectedAnswer {
                    node_id: node.id.clone(),
                    answer_key: step.answer_key.clone(),
                    answer: answer.to_string(),
                })
        }
    }
}

fn predicate_holds(
    node: &TreeNode,
    predicate: &Predicate,
    inputs: &SessionInputs,
) -> Result<bool, EvaluationError> {
    let holds = match predicate {
        Predicate::TemperatureIn { bands } => bands.contains(&inputs.vitals.temperature),
        Predicate::HeartRateOutOfRange => {
            inputs.vitals.heart_rate.status == RangeStatus::OutOfRange
        }
        Predicate::Spo2In { bands } => bands.contains(&inputs.vitals.spo2),
        Predicate::NoiseIn { bands } => bands.contains(&inputs.vitals.noise),
        Predicate::NutritionIn { indicator, bands } => {
            let status = inputs.nutrition_for(*indicator).ok_or_else(|| {
                EvaluationError::MissingSignal {
                    node_id: node.id.clone(),
                    signal: format!("nutrition:{indicator}"),
                }
            })?;
            bands.contains(&status.band)
        }
        Predicate::Threshold { signal, cmp, value } => {
            cmp.holds(signal_value(node, *signal, inputs)?, *value)
        }
        Predicate::AnswerEquals { key, value } => {
            let answer = inputs
                .answer(key)
                .ok_or_else(|| EvaluationError::MissingAnswer {
                    node_id: node.id.clone(),
                    answer_key: key.clone(),
                })?;
            normalize_answer(answer) == normalize_answer(value)
        }
        Predicate::All { of } => {
            for inner in of {
                if !predicate_holds(node, inner, inputs)? {
                    return Ok(false);
                }
            }
            true
        }
        Predicate::Any { of } => {
            for inner in of {
                if predicate_holds(node, inner, inputs)? {
                    return Ok(true);
                }
            }
            false
        }
        Predicate::Not { of } => !predicate_holds(node, of, inputs)?,
    };
    Ok(holds)
}

fn signal_value(
    node: &TreeNode,
    signal: Signal,
    inputs: &SessionInputs,
) -> Result<f64, EvaluationError> {
    let readings = &inputs.measurements;
    let value = match signal {
        Signal::TemperatureC => readings.temperature_c,
        Signal::HeartRateBpm => readings.heart_rate_bpm,
        Signal::Spo2Pct => readings.spo2_pct,
        Signal::NoiseDb => readings.noise_db,
        Signal::WeightKg => readings.weight_kg,
        Signal::HeightCm => readings.height_cm,
        Signal::AgeDays => f64::from(inputs.age_days),
        Signal::ZScore(indicator) => {
            inputs
                .nutrition_for(indicator)
                .ok_or_else(|| EvaluationError::MissingSignal {
                    node_id: node.id.clone(),
                    signal: format!("z_score:{indicator}"),
                })?
                .z_score
        }
    };
    Ok(value)
}

fn outcome(tree: &VerifiedTree, node: &TreeNode, step: &OutcomeStep, path: Vec<NodeId>) -> Outcome {
    Outcome {
        disease_id: tree.disease_id().to_string(),
        tree_version: tree.version(),
        spec_hash: tree.spec_hash().to_string(),
        node_id: node.id.clone(),
        diagnosis: step.diagnosis.clone(),
        severity: step.severity,
        advice: step.advice.clone(),
        path,
    }
}

fn unreachable(tree: &VerifiedTree, node: &TreeNode, steps: usize) -> EvaluationError {
    EvaluationError::UnreachableOutcome {
        disease_id: tree.disease_id().to_string(),
        version: tree.version(),
        node_id: node.id.clone(),
        steps,
    }
}
