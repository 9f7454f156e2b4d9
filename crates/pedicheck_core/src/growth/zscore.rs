//! LMS z-score calculator.
//!
//! # Responsibility
//! - Resolve the indicator for the child's age (length vs. height tables).
//! - Look up or linearly interpolate L, M, S from the sealed reference table.
//! - Convert the measurement to a z-score and classify it.
//!
//! # Invariants
//! - Values outside the tabulated range are never extrapolated.
//! - The calculator holds no mutable state and performs no I/O.

use crate::growth::reference_table::{Bracket, ReferencePoint, ReferenceTable};
use crate::model::growth::{Gender, Indicator, NutritionBand, NutritionStatus, ReferenceAxis};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type ZScoreResult<T> = Result<T, ZScoreError>;

#[derive(Debug, Clone, PartialEq)]
pub enum ZScoreError {
    /// Non-physical input, e.g. zero weight or a missing length.
    InvalidMeasurement {
        indicator: Indicator,
        field: &'static str,
        value: f64,
    },
    /// Independent variable outside the table, or no series at all.
    OutOfRangeReference {
        indicator: Indicator,
        gender: Gender,
        value: f64,
        bounds: Option<(f64, f64)>,
    },
    /// Reference parameters that cannot produce a z-score.
    CorruptReferenceRow {
        indicator: Indicator,
        gender: Gender,
        key: f64,
        reason: &'static str,
    },
}

impl Display for ZScoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMeasurement {
                indicator,
                field,
                value,
            } => write!(f, "invalid measurement for {indicator}: {field}={value}"),
            Self::OutOfRangeReference {
                indicator,
                gender,
                value,
                bounds: Some((min, max)),
            } => write!(
                f,
                "{indicator}/{gender} reference covers {min}..={max}, got {value}"
            ),
            Self::OutOfRangeReference {
                indicator,
                gender,
                value,
                bounds: None,
            } => write!(
                f,
                "no {indicator}/{gender} reference series loaded (value {value})"
            ),
            Self::CorruptReferenceRow {
                indicator,
                gender,
                key,
                reason,
            } => write!(
                f,
                "corrupt reference row {indicator}/{gender} at key {key}: {reason}"
            ),
        }
    }
}

impl Error for ZScoreError {}

/// LMS parameters actually used for one computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LmsParams {
    pub l: f64,
    pub m: f64,
    pub s: f64,
}

/// Full z-score computation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZResult {
    /// Indicator evaluated after length/height resolution.
    pub indicator: Indicator,
    pub z_score: f64,
    pub band: NutritionBand,
    pub lms: LmsParams,
    /// Whether L, M, S were interpolated between two rows.
    pub interpolated: bool,
    pub implausible: bool,
}

impl ZResult {
    pub fn to_status(&self) -> NutritionStatus {
        NutritionStatus {
            indicator: self.indicator,
            z_score: self.z_score,
            band: self.band,
            implausible: self.implausible,
        }
    }
}

/// Z-score calculator over a sealed reference table.
#[derive(Debug, Clone)]
pub struct ZScoreCalculator {
    table: Arc<ReferenceTable>,
}

impl ZScoreCalculator {
    pub fn new(table: Arc<ReferenceTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &ReferenceTable {
        &self.table
    }

    /// Computes and classifies one z-score.
    ///
    /// `length_or_height_cm` is required for length/height-indexed indicators
    /// and ignored otherwise. `WEIGHT_FOR_LENGTH` and `WEIGHT_FOR_HEIGHT` are
    /// interchangeable on input; the age decides which table is used.
    pub fn compute(
        &self,
        indicator: Indicator,
        gender: Gender,
        age_days: u32,
        length_or_height_cm: Option<f64>,
        measured_value: f64,
    ) -> ZScoreResult<ZResult> {
        let indicator = indicator.resolve_for_age(age_days);
        if !measured_value.is_finite() || measured_value <= 0.0 {
            return Err(ZScoreError::InvalidMeasurement {
                indicator,
                field: "measured_value",
                value: measured_value,
            });
        }

        let lookup_value = match indicator.axis() {
            ReferenceAxis::AgeDays => f64::from(age_days),
            ReferenceAxis::LengthCm | ReferenceAxis::HeightCm => match length_or_height_cm {
                Some(cm) if cm.is_finite() && cm > 0.0 => cm,
                Some(cm) => {
                    return Err(ZScoreError::InvalidMeasurement {
                        indicator,
                        field: "length_or_height_cm",
                        value: cm,
                    })
                }
                None => {
                    return Err(ZScoreError::InvalidMeasurement {
                        indicator,
                        field: "length_or_height_cm",
                        value: f64::NAN,
                    })
                }
            },
        };

        let (lms, interpolated) = match self.table.bracket(indicator, gender, lookup_value) {
            Some(Bracket::Exact(point)) => (params(point), false),
            Some(Bracket::Between(lower, upper)) => (interpolate(lower, upper, lookup_value), true),
            Some(Bracket::OutOfRange { min, max }) => {
                return Err(ZScoreError::OutOfRangeReference {
                    indicator,
                    gender,
                    value: lookup_value,
                    bounds: Some((min, max)),
                })
            }
            None => {
                return Err(ZScoreError::OutOfRangeReference {
                    indicator,
                    gender,
                    value: lookup_value,
                    bounds: None,
                })
            }
        };

        let z_score = lms_z_score(measured_value, lms).map_err(|reason| {
            error!(
                "event=zscore module=growth status=error error_code=corrupt_reference_row indicator={} reason={}",
                indicator, reason
            );
            ZScoreError::CorruptReferenceRow {
                indicator,
                gender,
                key: lookup_value,
                reason,
            }
        })?;

        debug!(
            "event=zscore module=growth status=ok indicator={} interpolated={}",
            indicator, interpolated
        );
        Ok(ZResult {
            indicator,
            z_score,
            band: NutritionBand::from_z(z_score),
            lms,
            interpolated,
            implausible: indicator.is_implausible(z_score),
        })
    }
}

/// Box-Cox (LMS) transform of one measurement.
///
/// Returns the reason string when the parameters cannot yield a finite z-score.
pub fn lms_z_score(measured_value: f64, lms: LmsParams) -> Result<f64, &'static str> {
    if !lms.m.is_finite() || lms.m <= 0.0 {
        return Err("M must be positive");
    }
    if !lms.s.is_finite() || lms.s <= 0.0 {
        return Err("S must be positive");
    }
    if !lms.l.is_finite() {
        return Err("L must be finite");
    }

    let ratio = measured_value / lms.m;
    let z = if lms.l == 0.0 {
        ratio.ln() / lms.s
    } else {
        (ratio.powf(lms.l) - 1.0) / (lms.l * lms.s)
    };

    if z.is_finite() {
        Ok(z)
    } else {
        Err("z-score is not finite")
    }
}

/// Body-mass index in kg/m².
pub fn body_mass_index(weight_kg: f64, height_cm: f64) -> f64 {
    let height_m = height_cm / 100.0;
    weight_kg / (height_m * height_m)
}

fn params(point: ReferencePoint) -> LmsParams {
    LmsParams {
        l: point.l,
        m: point.m,
        s: point.s,
    }
}

fn interpolate(lower: ReferencePoint, upper: ReferencePoint, value: f64) -> LmsParams {
    let fraction = (value - lower.key) / (upper.key - lower.key);
    let lerp = |from: f64, to: f64| from + (to - from) * fraction;
    LmsParams {
        l: lerp(lower.l, upper.l),
        m: lerp(lower.m, upper.m),
        s: lerp(lower.s, upper.s),
    }
}
