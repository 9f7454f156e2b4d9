//! Vital-sign classifier.
//!
//! # Responsibility
//! - Map raw temperature, heart rate, SpO2 and ambient noise readings onto
//!   fixed clinical bands.
//!
//! # Invariants
//! - Classification is pure: no I/O, no state, no configuration.
//! - Readings outside a normal range are flagged, never treated as fatal.
//! - Boundaries belong to the lower-severity band.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

const NEWBORN_MAX_AGE_DAYS: u32 = 30;
const BABY_MAX_AGE_DAYS: u32 = 365;

const HYPOTHERMIA_BELOW_C: f64 = 35.5;
const SAFE_FROM_C: f64 = 36.5;
const SAFE_UP_TO_C: f64 = 37.5;
const MILD_FEVER_UP_TO_C: f64 = 38.0;
const MODERATE_FEVER_UP_TO_C: f64 = 39.0;

const SPO2_NORMAL_FROM: f64 = 95.0;
const SPO2_WARNING_FROM: f64 = 90.0;

const NOISE_WARNING_FROM_DB: f64 = 55.0;
const NOISE_WARNING_UP_TO_DB: f64 = 85.0;

/// Raw vital-sign readings for one session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VitalSigns {
    pub temperature_c: f64,
    pub heart_rate_bpm: f64,
    pub age_days: u32,
    pub spo2_pct: f64,
    pub noise_db: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemperatureBand {
    Hypothermia,
    /// Between hypothermia and the safe band.
    Low,
    Safe,
    MildFever,
    ModerateFever,
    SevereFever,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeartRateAgeBand {
    Newborn,
    Baby,
    Child,
}

impl HeartRateAgeBand {
    pub fn for_age(age_days: u32) -> Self {
        if age_days < NEWBORN_MAX_AGE_DAYS {
            Self::Newborn
        } else if age_days < BABY_MAX_AGE_DAYS {
            Self::Baby
        } else {
            Self::Child
        }
    }

    /// Inclusive normal range in beats per minute.
    pub fn normal_range(self) -> (f64, f64) {
        match self {
            Self::Newborn => (70.0, 190.0),
            Self::Baby => (80.0, 160.0),
            Self::Child => (70.0, 130.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RangeStatus {
    Normal,
    OutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Deviation {
    Below,
    Above,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRateClassification {
    pub age_band: HeartRateAgeBand,
    pub status: RangeStatus,
    /// Set only when `status` is `OutOfRange`.
    pub deviation: Option<Deviation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Spo2Band {
    Normal,
    Warning,
    Danger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NoiseBand {
    Safe,
    Warning,
    Unsafe,
}

/// Classified vital signs for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VitalsClassification {
    pub temperature: TemperatureBand,
    pub heart_rate: HeartRateClassification,
    pub spo2: Spo2Band,
    pub noise: NoiseBand,
}

/// Reading that cannot come from a living child or a working sensor.
#[derive(Debug, Clone, PartialEq)]
pub enum VitalsError {
    InvalidMeasurement { field: &'static str, value: f64 },
}

impl Display for VitalsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMeasurement { field, value } => {
                write!(f, "invalid vital sign measurement: {field}={value}")
            }
        }
    }
}

impl Error for VitalsError {}

/// Classifies all vital signs of one session.
pub fn classify_vitals(signs: &VitalSigns) -> Result<VitalsClassification, VitalsError> {
    ensure(
        signs.temperature_c.is_finite() && signs.temperature_c > 0.0,
        "temperature_c",
        signs.temperature_c,
    )?;
    ensure(
        signs.heart_rate_bpm.is_finite() && signs.heart_rate_bpm > 0.0,
        "heart_rate_bpm",
        signs.heart_rate_bpm,
    )?;
    ensure((0.0..=100.0).contains(&signs.spo2_pct), "spo2_pct", signs.spo2_pct)?;
    ensure(signs.noise_db.is_finite() && signs.noise_db >= 0.0, "noise_db", signs.noise_db)?;

    Ok(VitalsClassification {
        temperature: classify_temperature(signs.temperature_c),
        heart_rate: classify_heart_rate(signs.heart_rate_bpm, signs.age_days),
        spo2: classify_spo2(signs.spo2_pct),
        noise: classify_noise(signs.noise_db),
    })
}

pub fn classify_temperature(celsius: f64) -> TemperatureBand {
    if celsius < HYPOTHERMIA_BELOW_C {
        TemperatureBand::Hypothermia
    } else if celsius < SAFE_FROM_C {
        TemperatureBand::Low
    } else if celsius <= SAFE_UP_TO_C {
        TemperatureBand::Safe
    } else if celsius <= MILD_FEVER_UP_TO_C {
        TemperatureBand::MildFever
    } else if celsius <= MODERATE_FEVER_UP_TO_C {
        TemperatureBand::ModerateFever
    } else {
        TemperatureBand::SevereFever
    }
}

pub fn classify_heart_rate(bpm: f64, age_days: u32) -> HeartRateClassification {
    let age_band = HeartRateAgeBand::for_age(age_days);
    let (min, max) = age_band.normal_range();
    let deviation = if bpm < min {
        Some(Deviation::Below)
    } else if bpm > max {
        Some(Deviation::Above)
    } else {
        None
    };

    HeartRateClassification {
        age_band,
        status: if deviation.is_some() {
            RangeStatus::OutOfRange
        } else {
            RangeStatus::Normal
        },
        deviation,
    }
}

pub fn classify_spo2(percent: f64) -> Spo2Band {
    if percent >= SPO2_NORMAL_FROM {
        Spo2Band::Normal
    } else if percent >= SPO2_WARNING_FROM {
        Spo2Band::Warning
    } else {
        Spo2Band::Danger
    }
}

pub fn classify_noise(decibels: f64) -> NoiseBand {
    if decibels < NOISE_WARNING_FROM_DB {
        NoiseBand::Safe
    } else if decibels <= NOISE_WARNING_UP_TO_DB {
        NoiseBand::Warning
    } else {
        NoiseBand::Unsafe
    }
}

fn ensure(ok: bool, field: &'static str, value: f64) -> Result<(), VitalsError> {
    if ok {
        Ok(())
    } else {
        Err(VitalsError::InvalidMeasurement { field, value })
    }
}
