//! Shared fixtures for integration tests.
#![allow(dead_code)]

use pedicheck_core::model::decision_tree::{
    BranchArm, BranchStep, DecisionTree, NodeKind, OutcomeStep, Predicate, QuestionStep,
    Severity, Transition, TreeNode,
};
use pedicheck_core::model::growth::{
    Gender, GrowthReferenceRow, Indicator, NutritionBand, NutritionStatus, SdCutoffs,
};
use pedicheck_core::model::session::{Measurements, SessionInputs};
use pedicheck_core::tree::integrity::compute_spec_hash;
use pedicheck_core::vitals::{classify_vitals, TemperatureBand, VitalSigns};
use std::collections::BTreeMap;

pub const FEVER: &str = "fever";

/// Measurement value at `k` standard deviations for LMS parameters.
pub fn value_at_sd(l: f64, m: f64, s: f64, k: f64) -> f64 {
    if l == 0.0 {
        m * (s * k).exp()
    } else {
        m * (1.0 + l * s * k).powf(1.0 / l)
    }
}

pub fn sd_cutoffs(l: f64, m: f64, s: f64) -> SdCutoffs {
    SdCutoffs {
        sd3neg: value_at_sd(l, m, s, -3.0),
        sd2neg: value_at_sd(l, m, s, -2.0),
        sd1neg: value_at_sd(l, m, s, -1.0),
        sd0: m,
        sd1: value_at_sd(l, m, s, 1.0),
        sd2: value_at_sd(l, m, s, 2.0),
        sd3: value_at_sd(l, m, s, 3.0),
    }
}

pub fn age_row(
    indicator: Indicator,
    gender: Gender,
    age_days: u32,
    lms: (f64, f64, f64),
) -> GrowthReferenceRow {
    let (l, m, s) = lms;
    GrowthReferenceRow {
        indicator,
        gender,
        age_days: Some(age_days),
        length_height_cm: None,
        l,
        m,
        s,
        sd: sd_cutoffs(l, m, s),
    }
}

pub fn length_row(
    indicator: Indicator,
    gender: Gender,
    cm: f64,
    lms: (f64, f64, f64),
) -> GrowthReferenceRow {
    let (l, m, s) = lms;
    GrowthReferenceRow {
        indicator,
        gender,
        age_days: None,
        length_height_cm: Some(cm),
        l,
        m,
        s,
        sd: sd_cutoffs(l, m, s),
    }
}

/// Small synthetic growth standard for both genders.
///
/// Female weight-for-age at 600 days is `L=1, M=7.5, S=0.1`.
pub fn reference_rows() -> Vec<GrowthReferenceRow> {
    let mut rows = Vec::new();
    for (gender, scale) in [(Gender::Female, 1.0), (Gender::Male, 1.05)] {
        for (age, m, s) in [
            (0, 3.2, 0.14),
            (300, 6.0, 0.12),
            (600, 7.5, 0.1),
            (729, 8.0, 0.1),
            (730, 8.1, 0.1),
            (1000, 9.0, 0.1),
            (1856, 12.0, 0.1),
        ] {
            let lms = (1.0, m * scale, s);
            rows.push(age_row(Indicator::WeightForAge, gender, age, lms));
        }
        for (age, m) in [(0, 49.1), (600, 80.0), (1856, 108.0)] {
            let lms = (1.0, m * scale, 0.04);
            rows.push(age_row(Indicator::HeightForAge, gender, age, lms));
        }
        for (cm, m) in [(45.0, 2.4), (80.0, 7.5), (110.0, 18.0)] {
            let lms = (-0.35, m * scale, 0.09);
            rows.push(length_row(Indicator::WeightForLength, gender, cm, lms));
        }
        for (cm, m) in [(65.0, 7.0), (90.0, 12.5), (120.0, 22.0)] {
            let lms = (-0.35, m * scale, 0.085);
            rows.push(length_row(Indicator::WeightForHeight, gender, cm, lms));
        }
        for (age, m) in [(0, 13.4), (600, 11.5), (1856, 15.5)] {
            let lms = (-0.5, m * scale, 0.08);
            rows.push(age_row(Indicator::BmiForAge, gender, age, lms));
        }
    }
    rows
}

fn question(id: &str, entry: bool, answer_key: &str, routes: &[(&str, &str)]) -> TreeNode {
    let step = QuestionStep {
        answer_key: answer_key.to_string(),
        prompt: format!("{answer_key}?"),
        next: Transition::ByAnswer {
            routes: routes
                .iter()
                .map(|(answer, next)| (answer.to_string(), next.to_string()))
                .collect(),
            fallback: None,
        },
    };
    TreeNode {
        id: id.to_string(),
        kind: if entry {
            NodeKind::EntryGate(step)
        } else {
            NodeKind::Question(step)
        },
    }
}

fn outcome(id: &str, diagnosis: &str, severity: Severity) -> TreeNode {
    TreeNode {
        id: id.to_string(),
        kind: NodeKind::Outcome(OutcomeStep {
            diagnosis: diagnosis.to_string(),
            severity,
            advice: None,
        }),
    }
}

pub fn fever_nodes() -> Vec<TreeNode> {
    vec![
        question(
            "start",
            true,
            "fever_onset",
            &[("yes", "temp_check"), ("no", "no_fever")],
        ),
        TreeNode {
            id: "temp_check".to_string(),
            kind: NodeKind::Branch(BranchStep {
                arms: vec![
                    BranchArm {
                        when: Predicate::TemperatureIn {
                            bands: vec![TemperatureBand::SevereFever],
                        },
                        next: "emergency".to_string(),
                    },
                    BranchArm {
                        when: Predicate::All {
                            of: vec![
                                Predicate::TemperatureIn {
                                    bands: vec![TemperatureBand::ModerateFever],
                                },
                                Predicate::NutritionIn {
                                    indicator: Indicator::WeightForAge,
                                    bands: vec![NutritionBand::SevereUnder, NutritionBand::Under],
                                },
                            ],
                        },
                        next: "malnourished_fever".to_string(),
                    },
                ],
                otherwise: "fever_days".to_string(),
            }),
        },
        question(
            "fever_days",
            false,
            "fever_days",
            &[("less than 3", "short_fever"), ("3 or more", "persistent_fever")],
        ),
        outcome("no_fever", "no fever", Severity::Mild),
        outcome("emergency", "hyperpyrexia", Severity::Emergency),
        outcome("malnourished_fever", "fever with undernutrition", Severity::Severe),
        outcome("short_fever", "uncomplicated fever", Severity::Mild),
        outcome("persistent_fever", "persistent fever", Severity::Moderate),
    ]
}

/// Fever triage tree with a correct spec hash.
pub fn fever_tree(version: u32) -> DecisionTree {
    tree_with_nodes(FEVER, version, fever_nodes())
}

pub fn tree_with_nodes(disease_id: &str, version: u32, nodes: Vec<TreeNode>) -> DecisionTree {
    let spec_hash = compute_spec_hash(&nodes).unwrap();
    DecisionTree {
        disease_id: disease_id.to_string(),
        version,
        is_active: false,
        approved_at: 1_700_000_000_000,
        spec_hash,
        nodes,
    }
}

/// Replaces the diagnosis of one outcome node without touching `spec_hash`.
pub fn tamper_diagnosis(tree: &mut DecisionTree, node_id: &str, diagnosis: &str) {
    for node in &mut tree.nodes {
        if node.id == node_id {
            if let NodeKind::Outcome(step) = &mut node.kind {
                step.diagnosis = diagnosis.to_string();
            }
        }
    }
}

pub fn answers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Session of a 600-day-old girl with the given temperature and WFA band.
pub fn session(
    temperature_c: f64,
    wfa_band: Option<NutritionBand>,
    answers: BTreeMap<String, String>,
) -> SessionInputs {
    let measurements = Measurements {
        weight_kg: 7.0,
        height_cm: 80.0,
        temperature_c,
        heart_rate_bpm: 120.0,
        spo2_pct: 98.0,
        noise_db: 40.0,
    };
    let vitals = classify_vitals(&VitalSigns {
        temperature_c,
        heart_rate_bpm: measurements.heart_rate_bpm,
        age_days: 600,
        spo2_pct: measurements.spo2_pct,
        noise_db: measurements.noise_db,
    })
    .unwrap();
    let nutrition = wfa_band
        .map(|band| NutritionStatus {
            indicator: Indicator::WeightForAge,
            z_score: match band {
                NutritionBand::SevereUnder => -3.5,
                NutritionBand::Under => -2.5,
                NutritionBand::Normal => 0.0,
                NutritionBand::Over => 2.5,
                NutritionBand::SevereOver => 3.5,
            },
            band,
            implausible: false,
        })
        .into_iter()
        .collect();

    SessionInputs {
        age_days: 600,
        gender: Gender::Female,
        measurements,
        vitals,
        nutrition,
        answers,
    }
}
