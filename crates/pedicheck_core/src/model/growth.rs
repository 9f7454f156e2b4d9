//! Growth-standard domain model.
//!
//! # Responsibility
//! - Define indicators, genders, reference rows and nutrition classifications.
//! - Own the fixed clinical constants (length/height age boundary, band cutoffs).
//!
//! # Invariants
//! - Age-indexed indicators key rows by `age_days`; length/height-indexed
//!   indicators key rows by `length_height_cm`. Never both.
//! - Band boundaries are closed on the more severe side.
//!
//! # See also
//! - growth/zscore.rs
//! - db/migrations/0001_growth_reference.sql

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// First age (in days) at which standing height replaces recumbent length.
///
/// Children aged `0..=729` days are assessed against length-indexed tables,
/// children aged `730` days or older against height-indexed tables.
pub const LENGTH_TO_HEIGHT_AGE_DAYS: u32 = 730;

/// Growth indicator assessed against one reference series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Indicator {
    WeightForAge,
    HeightForAge,
    WeightForLength,
    WeightForHeight,
    BmiForAge,
}

/// Independent variable used to key a reference series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceAxis {
    /// Completed days since birth.
    AgeDays,
    /// Recumbent length in centimetres.
    LengthCm,
    /// Standing height in centimetres.
    HeightCm,
}

impl Indicator {
    pub const ALL: [Indicator; 5] = [
        Indicator::WeightForAge,
        Indicator::HeightForAge,
        Indicator::WeightForLength,
        Indicator::WeightForHeight,
        Indicator::BmiForAge,
    ];

    /// Returns the axis rows of this indicator are keyed by.
    pub fn axis(self) -> ReferenceAxis {
        match self {
            Self::WeightForAge | Self::HeightForAge | Self::BmiForAge => ReferenceAxis::AgeDays,
            Self::WeightForLength => ReferenceAxis::LengthCm,
            Self::WeightForHeight => ReferenceAxis::HeightCm,
        }
    }

    /// Returns whether rows are keyed by age rather than by length/height.
    pub fn is_age_indexed(self) -> bool {
        self.axis() == ReferenceAxis::AgeDays
    }

    /// Picks the length- or height-indexed variant matching the child's age.
    ///
    /// Age-indexed indicators are returned unchanged.
    pub fn resolve_for_age(self, age_days: u32) -> Self {
        match self {
            Self::WeightForLength | Self::WeightForHeight => {
                if age_days < LENGTH_TO_HEIGHT_AGE_DAYS {
                    Self::WeightForLength
                } else {
                    Self::WeightForHeight
                }
            }
            other => other,
        }
    }

    /// Two indicators share a family when they only differ by length/height.
    pub fn same_family(self, other: Self) -> bool {
        self.resolve_for_age(0) == other.resolve_for_age(0)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::WeightForAge => "WEIGHT_FOR_AGE",
            Self::HeightForAge => "HEIGHT_FOR_AGE",
            Self::WeightForLength => "WEIGHT_FOR_LENGTH",
            Self::WeightForHeight => "WEIGHT_FOR_HEIGHT",
            Self::BmiForAge => "BMI_FOR_AGE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|indicator| indicator.as_str() == value)
    }

    /// Returns whether `z` lies outside the data-cleaning limits published
    /// with the growth standard.
    pub fn is_implausible(self, z: f64) -> bool {
        match self {
            Self::WeightForAge => !(-6.0..=5.0).contains(&z),
            Self::HeightForAge => z.abs() > 6.0,
            Self::WeightForLength | Self::WeightForHeight | Self::BmiForAge => z.abs() > 5.0,
        }
    }
}

impl Display for Indicator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference population sex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "M",
            Self::Female => "F",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "M" => Some(Self::Male),
            "F" => Some(Self::Female),
            _ => None,
        }
    }
}

impl Display for Gender {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Precomputed measurement values at -3..=+3 standard deviations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SdCutoffs {
    pub sd3neg: f64,
    pub sd2neg: f64,
    pub sd1neg: f64,
    pub sd0: f64,
    pub sd1: f64,
    pub sd2: f64,
    pub sd3: f64,
}

impl SdCutoffs {
    pub fn as_array(&self) -> [f64; 7] {
        [
            self.sd3neg,
            self.sd2neg,
            self.sd1neg,
            self.sd0,
            self.sd1,
            self.sd2,
            self.sd3,
        ]
    }

    pub fn is_strictly_increasing(&self) -> bool {
        self.as_array().windows(2).all(|pair| pair[0] < pair[1])
    }
}

/// One row of an immutable growth-standard reference table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthReferenceRow {
    pub indicator: Indicator,
    pub gender: Gender,
    /// Set for age-indexed indicators only.
    pub age_days: Option<u32>,
    /// Set for length/height-indexed indicators only.
    pub length_height_cm: Option<f64>,
    pub l: f64,
    pub m: f64,
    pub s: f64,
    pub sd: SdCutoffs,
}

impl GrowthReferenceRow {
    /// Returns the independent-variable value this row is keyed by.
    ///
    /// `None` means the row carries the wrong key for its indicator.
    pub fn key(&self) -> Option<f64> {
        match (self.indicator.is_age_indexed(), self.age_days, self.length_height_cm) {
            (true, Some(age), None) => Some(f64::from(age)),
            (false, None, Some(cm)) => Some(cm),
            _ => None,
        }
    }

    /// Human-readable key used in error and log context.
    pub fn key_label(&self) -> String {
        match (self.age_days, self.length_height_cm) {
            (Some(age), _) => format!("age_days={age}"),
            (None, Some(cm)) => format!("length_height_cm={cm}"),
            (None, None) => "no_key".to_string(),
        }
    }
}

/// Severity band a z-score falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NutritionBand {
    SevereUnder,
    Under,
    Normal,
    Over,
    SevereOver,
}

impl NutritionBand {
    /// Classifies a z-score; boundaries belong to the more severe band.
    pub fn from_z(z: f64) -> Self {
        if z <= -3.0 {
            Self::SevereUnder
        } else if z <= -2.0 {
            Self::Under
        } else if z >= 3.0 {
            Self::SevereOver
        } else if z >= 2.0 {
            Self::Over
        } else {
            Self::Normal
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SevereUnder => "SEVERE_UNDER",
            Self::Under => "UNDER",
            Self::Normal => "NORMAL",
            Self::Over => "OVER",
            Self::SevereOver => "SEVERE_OVER",
        }
    }
}

/// Classified growth result for one indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionStatus {
    /// Indicator actually evaluated (after length/height resolution).
    pub indicator: Indicator,
    pub z_score: f64,
    pub band: NutritionBand,
    /// Outside the publisher's data-cleaning limits; band is still reported.
    pub implausible: bool,
}
