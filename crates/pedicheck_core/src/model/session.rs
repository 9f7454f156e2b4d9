//! Session snapshot consumed by the decision tree engine.

use crate::model::growth::{Gender, Indicator, NutritionStatus};
use crate::vitals::VitalsClassification;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw measurements recorded during one session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    pub weight_kg: f64,
    pub height_cm: f64,
    pub temperature_c: f64,
    pub heart_rate_bpm: f64,
    pub spo2_pct: f64,
    pub noise_db: f64,
}

/// Immutable evaluation input: raw readings plus their classifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInputs {
    pub age_days: u32,
    pub gender: Gender,
    pub measurements: Measurements,
    pub vitals: VitalsClassification,
    pub nutrition: Vec<NutritionStatus>,
    /// Question id -> raw answer text.
    pub answers: BTreeMap<String, String>,
}

impl SessionInputs {
    /// Finds the nutrition status evaluated for `indicator`.
    ///
    /// Length/height-indexed indicators are resolved against the session age
    /// first, so a tree may name either variant.
    pub fn nutrition_for(&self, indicator: Indicator) -> Option<&NutritionStatus> {
        let resolved = indicator.resolve_for_age(self.age_days);
        self.nutrition
            .iter()
            .find(|status| status.indicator == resolved)
    }

    pub fn answer(&self, key: &str) -> Option<&str> {
        self.answers.get(key).map(String::as_str)
    }
}
