//! Assessment use-case service.
//!
//! # Responsibility
//! - Turn one `AssessmentRequest` into nutrition statuses, a vitals
//!   classification and a clinical outcome.
//!
//! # Invariants
//! - All-or-nothing: any failing step fails the whole assessment.
//! - The request is never mutated; the caller persists the result.
//! - Shared state (reference table, tree store) is only read.

use crate::config::{ConfigError, CoreConfig};
use crate::growth::reference_table::ReferenceTable;
use crate::growth::zscore::{body_mass_index, ZScoreCalculator, ZScoreError};
use crate::model::growth::{Gender, Indicator, NutritionStatus};
use crate::model::session::{Measurements, SessionInputs};
use crate::tree::engine::{DecisionTreeEngine, EvaluationError, Outcome};
use crate::tree::store::{DecisionTreeStore, TreeStoreError};
use crate::vitals::{classify_vitals, VitalSigns, VitalsClassification, VitalsError};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

/// Input of one assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRequest {
    pub gender: Gender,
    pub age_days: u32,
    pub weight_kg: f64,
    /// Recumbent length below 730 days, standing height from 730 days.
    pub height_or_length_cm: f64,
    /// Body temperature in °C.
    pub temperature: f64,
    /// Beats per minute.
    pub heart_rate: f64,
    /// Percent saturation.
    pub spo2: f64,
    /// Ambient noise in dB.
    pub noise_level: f64,
    pub disease_id: String,
    #[serde(default)]
    pub answers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentResult {
    pub nutrition: Vec<NutritionStatus>,
    pub vitals: VitalsClassification,
    pub clinical_outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssessmentError {
    ZScore(ZScoreError),
    Vitals(VitalsError),
    TreeStore(TreeStoreError),
    Evaluation(EvaluationError),
}

impl Display for AssessmentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZScore(err) => write!(f, "{err}"),
            Self::Vitals(err) => write!(f, "{err}"),
            Self::TreeStore(err) => write!(f, "{err}"),
            Self::Evaluation(err) => write!(f, "{err}"),
        }
    }
}

impl Error for AssessmentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ZScore(err) => Some(err),
            Self::Vitals(err) => Some(err),
            Self::TreeStore(err) => Some(err),
            Self::Evaluation(err) => Some(err),
        }
    }
}

impl From<ZScoreError> for AssessmentError {
    fn from(value: ZScoreError) -> Self {
        Self::ZScore(value)
    }
}

impl From<VitalsError> for AssessmentError {
    fn from(value: VitalsError) -> Self {
        Self::Vitals(value)
    }
}

impl From<TreeStoreError> for AssessmentError {
    fn from(value: TreeStoreError) -> Self {
        Self::TreeStore(value)
    }
}

impl From<EvaluationError> for AssessmentError {
    fn from(value: EvaluationError) -> Self {
        Self::Evaluation(value)
    }
}

impl AssessmentError {
    /// Stable code used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ZScore(ZScoreError::InvalidMeasurement { .. })
            | Self::Vitals(VitalsError::InvalidMeasurement { .. }) => "invalid_measurement",
            Self::ZScore(ZScoreError::OutOfRangeReference { .. }) => "out_of_range_reference",
            Self::ZScore(ZScoreError::CorruptReferenceRow { .. }) => "corrupt_reference_row",
            Self::TreeStore(TreeStoreError::NoActiveTree { .. }) => "no_active_tree",
            Self::TreeStore(_) => "tree_integrity",
            Self::Evaluation(EvaluationError::MissingAnswer { .. }) => "missing_answer",
            Self::Evaluation(EvaluationError::UnexpectedAnswer { .. }) => "unexpected_answer",
            Self::Evaluation(EvaluationError::MissingSignal { .. }) => "missing_signal",
            Self::Evaluation(EvaluationError::UnreachableOutcome { .. }) => "unreachable_outcome",
        }
    }
}

/// Stateless orchestrator over shared, immutable clinical data.
#[derive(Debug, Clone)]
pub struct AssessmentService {
    calculator: ZScoreCalculator,
    trees: Arc<DecisionTreeStore>,
    engine: DecisionTreeEngine,
    indicators: Vec<Indicator>,
}

impl AssessmentService {
    pub fn new(
        reference: Arc<ReferenceTable>,
        trees: Arc<DecisionTreeStore>,
        config: &CoreConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            calculator: ZScoreCalculator::new(reference),
            trees,
            engine: DecisionTreeEngine::new(config.max_traversal_steps),
            indicators: config.nutrition_indicators.clone(),
        })
    }

    pub fn calculator(&self) -> &ZScoreCalculator {
        &self.calculator
    }

    pub fn trees(&self) -> &DecisionTreeStore {
        &self.trees
    }

    /// Runs one full assessment.
    pub fn assess(&self, request: &AssessmentRequest) -> Result<AssessmentResult, AssessmentError> {
        let started_at = Instant::now();
        match self.run(request) {
            Ok(result) => {
                info!(
                    "event=assessment module=service status=ok disease_id={} version={} severity={:?} duration_ms={}",
                    result.clinical_outcome.disease_id,
                    result.clinical_outcome.tree_version,
                    result.clinical_outcome.severity,
                    started_at.elapsed().as_millis()
                );
                Ok(result)
            }
            Err(err) => {
                warn!(
                    "event=assessment module=service status=error disease_id={} error_code={} duration_ms={}",
                    request.disease_id,
                    err.code(),
                    started_at.elapsed().as_millis()
                );
                Err(err)
            }
        }
    }

    /// Computes the configured nutrition statuses only.
    pub fn nutrition(
        &self,
        request: &AssessmentRequest,
    ) -> Result<Vec<NutritionStatus>, ZScoreError> {
        self.indicators
            .iter()
            .map(|indicator| self.nutrition_status(*indicator, request))
            .collect()
    }

    fn run(&self, request: &AssessmentRequest) -> Result<AssessmentResult, AssessmentError> {
        let vitals = classify_vitals(&VitalSigns {
            temperature_c: request.temperature,
            heart_rate_bpm: request.heart_rate,
            age_days: request.age_days,
            spo2_pct: request.spo2,
            noise_db: request.noise_level,
        })?;
        let nutrition = self.nutrition(request)?;
        let tree = self.trees.active_tree(&request.disease_id)?;

        let inputs = SessionInputs {
            age_days: request.age_days,
            gender: request.gender,
            measurements: Measurements {
                weight_kg: request.weight_kg,
                height_cm: request.height_or_length_cm,
                temperature_c: request.temperature,
                heart_rate_bpm: request.heart_rate,
                spo2_pct: request.spo2,
                noise_db: request.noise_level,
            },
            vitals,
            nutrition,
            answers: request.answers.clone(),
        };
        let clinical_outcome = self.engine.evaluate(&tree, &inputs)?;

        Ok(AssessmentResult {
            nutrition: inputs.nutrition,
            vitals: inputs.vitals,
            clinical_outcome,
        })
    }

    fn nutrition_status(
        &self,
        indicator: Indicator,
        request: &AssessmentRequest,
    ) -> Result<NutritionStatus, ZScoreError> {
        let weight = request.weight_kg;
        let height = request.height_or_length_cm;
        let (length_or_height, measured) = match indicator {
            Indicator::WeightForAge => (None, weight),
            Indicator::HeightForAge => (None, height),
            Indicator::WeightForLength | Indicator::WeightForHeight => (Some(height), weight),
            Indicator::BmiForAge => {
                if !height.is_finite() || height <= 0.0 {
                    return Err(ZScoreError::InvalidMeasurement {
                        indicator,
                        field: "height_or_length_cm",
                        value: height,
                    });
                }
                (None, body_mass_index(weight, height))
            }
        };

        let result = self.calculator.compute(
            indicator,
            request.gender,
            request.age_days,
            length_or_height,
            measured,
        )?;
        Ok(result.to_status())
    }
}
