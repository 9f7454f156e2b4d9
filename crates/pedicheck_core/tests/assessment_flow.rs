mod common;

use common::{answers, fever_tree, reference_rows, FEVER};
use pedicheck_core::db::open_db_in_memory;
use pedicheck_core::growth::reference_table::ReferenceTable;
use pedicheck_core::growth::zscore::ZScoreError;
use pedicheck_core::model::decision_tree::Severity;
use pedicheck_core::model::growth::{Gender, Indicator, NutritionBand};
use pedicheck_core::repo::reference_repo::{
    ReferenceRepoError, ReferenceRepository, SqliteReferenceRepository,
};
use pedicheck_core::repo::tree_repo::{SqliteTreeRepository, TreeVersionRepository};
use pedicheck_core::tree::engine::EvaluationError;
use pedicheck_core::tree::store::{DecisionTreeStore, TreeStoreError};
use pedicheck_core::vitals::{TemperatureBand, VitalsError};
use pedicheck_core::{
    bootstrap_service, AssessmentError, AssessmentRequest, AssessmentService, BootstrapError,
    CoreConfig,
};
use rusqlite::Connection;
use std::sync::Arc;

fn seeded_connection() -> Connection {
    let conn = open_db_in_memory().unwrap();
    SqliteReferenceRepository::try_new(&conn)
        .unwrap()
        .seed("synthetic-2024", &reference_rows())
        .unwrap();
    let trees = SqliteTreeRepository::try_new(&conn).unwrap();
    trees.import_tree(&fever_tree(1)).unwrap();
    trees.activate(FEVER, 1).unwrap();
    conn
}

fn request(age_days: u32) -> AssessmentRequest {
    AssessmentRequest {
        gender: Gender::Female,
        age_days,
        weight_kg: 7.0,
        height_or_length_cm: 80.0,
        temperature: 38.5,
        heart_rate: 120.0,
        spo2: 98.0,
        noise_level: 40.0,
        disease_id: FEVER.to_string(),
        answers: answers(&[("fever_onset", "yes"), ("fever_days", "less than 3")]),
    }
}

#[test]
fn bootstrapped_service_runs_a_full_assessment() {
    let conn = seeded_connection();
    let (service, report) = bootstrap_service(&conn, &CoreConfig::default()).unwrap();
    assert_eq!(report.activated, vec![(FEVER.to_string(), 1)]);

    let result = service.assess(&request(600)).unwrap();

    let indicators: Vec<Indicator> = result
        .nutrition
        .iter()
        .map(|status| status.indicator)
        .collect();
    assert_eq!(
        indicators,
        vec![
            Indicator::WeightForAge,
            Indicator::HeightForAge,
            Indicator::WeightForLength,
            Indicator::BmiForAge,
        ]
    );
    assert!((result.nutrition[0].z_score + 2.0 / 3.0).abs() < 1e-9);
    assert!(result.nutrition[1].z_score.abs() < 1e-12);
    assert!(result
        .nutrition
        .iter()
        .all(|status| status.band == NutritionBand::Normal && !status.implausible));

    assert_eq!(result.vitals.temperature, TemperatureBand::ModerateFever);
    assert_eq!(result.clinical_outcome.node_id, "short_fever");
    assert_eq!(result.clinical_outcome.severity, Severity::Mild);
    assert_eq!(result.clinical_outcome.tree_version, 1);
}

#[test]
fn older_children_are_assessed_weight_for_height() {
    let conn = seeded_connection();
    let (service, _) = bootstrap_service(&conn, &CoreConfig::default()).unwrap();

    let mut older = request(800);
    older.weight_kg = 10.5;
    older.height_or_length_cm = 82.0;
    let result = service.assess(&older).unwrap();

    assert_eq!(result.nutrition[2].indicator, Indicator::WeightForHeight);
}

#[test]
fn any_failing_step_fails_the_whole_assessment() {
    let conn = seeded_connection();
    let (service, _) = bootstrap_service(&conn, &CoreConfig::default()).unwrap();

    let mut bad_vitals = request(600);
    bad_vitals.heart_rate = 0.0;
    assert!(matches!(
        service.assess(&bad_vitals),
        Err(AssessmentError::Vitals(VitalsError::InvalidMeasurement {
            field: "heart_rate_bpm",
            ..
        }))
    ));

    let too_old = request(2000);
    assert!(matches!(
        service.assess(&too_old),
        Err(AssessmentError::ZScore(ZScoreError::OutOfRangeReference { .. }))
    ));

    let mut unknown = request(600);
    unknown.disease_id = "cholera".to_string();
    assert!(matches!(
        service.assess(&unknown),
        Err(AssessmentError::TreeStore(TreeStoreError::NoActiveTree { .. }))
    ));

    let mut unanswered = request(600);
    unanswered.answers.clear();
    let err = service.assess(&unanswered).unwrap_err();
    assert_eq!(err.code(), "missing_answer");
    assert!(matches!(
        err,
        AssessmentError::Evaluation(EvaluationError::MissingAnswer { .. })
    ));
}

#[test]
fn small_configured_step_budget_still_completes_verified_trees() {
    let reference = Arc::new(ReferenceTable::from_rows(reference_rows()).unwrap());
    let trees = Arc::new(DecisionTreeStore::new());
    trees.register(fever_tree(1)).unwrap();
    trees.activate(FEVER, 1).unwrap();

    let config = CoreConfig {
        max_traversal_steps: 2,
        nutrition_indicators: vec![Indicator::WeightForAge],
        ..CoreConfig::default()
    };
    let service = AssessmentService::new(reference, trees, &config).unwrap();

    let result = service.assess(&request(600)).unwrap();
    assert_eq!(result.clinical_outcome.node_id, "short_fever");
    assert_eq!(
        result.clinical_outcome.path,
        vec!["start", "temp_check", "fever_days", "short_fever"]
    );
    assert_eq!(result.nutrition.len(), 1);
}

#[test]
fn bootstrap_requires_sealed_reference_data() {
    let conn = open_db_in_memory().unwrap();

    assert!(matches!(
        bootstrap_service(&conn, &CoreConfig::default()),
        Err(BootstrapError::Reference(ReferenceRepoError::ReferenceNotSealed))
    ));
}

#[test]
fn request_deserializes_from_json_without_answers() {
    let request: AssessmentRequest = serde_json::from_str(
        r#"{
            "gender": "F",
            "age_days": 600,
            "weight_kg": 7.0,
            "height_or_length_cm": 80.0,
            "temperature": 36.9,
            "heart_rate": 110,
            "spo2": 97,
            "noise_level": 35,
            "disease_id": "fever"
        }"#,
    )
    .unwrap();

    assert_eq!(request.gender, Gender::Female);
    assert!(request.answers.is_empty());
}
