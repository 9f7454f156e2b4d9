mod common;

use common::{fever_tree, tamper_diagnosis, FEVER};
use pedicheck_core::db::open_db_in_memory;
use pedicheck_core::repo::tree_repo::{SqliteTreeRepository, TreeRepoError, TreeVersionRepository};
use pedicheck_core::model::decision_tree::NodeKind;
use pedicheck_core::tree::integrity::{compute_spec_hash, IntegrityError};
use pedicheck_core::tree::structure::TreeValidationError;
use pedicheck_core::tree::store::{DecisionTreeStore, TreeStoreError};
use std::sync::Arc;
use std::thread;

#[test]
fn register_then_activate_serves_verified_tree() {
    let store = DecisionTreeStore::new();
    store.register(fever_tree(1)).unwrap();

    assert!(matches!(
        store.active_tree(FEVER),
        Err(TreeStoreError::NoActiveTree { .. })
    ));

    let active = store.activate(FEVER, 1).unwrap();
    assert_eq!(active.version(), 1);
    assert!(active.tree().is_active);
    assert_eq!(store.active_version(FEVER), Some(1));
    assert_eq!(store.active_diseases(), vec![FEVER.to_string()]);
}

#[test]
fn tampered_version_is_refused_and_previous_stays_active() {
    let store = DecisionTreeStore::new();
    store.register(fever_tree(1)).unwrap();
    store.activate(FEVER, 1).unwrap();

    let mut tampered = fever_tree(2);
    tamper_diagnosis(&mut tampered, "emergency", "mild rash");
    store.register(tampered).unwrap();

    assert!(matches!(
        store.activate(FEVER, 2),
        Err(TreeStoreError::Integrity(IntegrityError::SpecHashMismatch { version: 2, .. }))
    ));
    assert_eq!(store.active_version(FEVER), Some(1));
}

#[test]
fn duplicate_and_unknown_versions_are_reported() {
    let store = DecisionTreeStore::new();
    store.register(fever_tree(1)).unwrap();

    assert!(matches!(
        store.register(fever_tree(1)),
        Err(TreeStoreError::DuplicateVersion { version: 1, .. })
    ));
    assert!(matches!(
        store.activate(FEVER, 9),
        Err(TreeStoreError::VersionNotFound { version: 9, .. })
    ));
}

#[test]
fn activation_flip_is_atomic_for_concurrent_readers() {
    let store = Arc::new(DecisionTreeStore::new());
    store.register(fever_tree(1)).unwrap();
    store.register(fever_tree(2)).unwrap();
    store.activate(FEVER, 1).unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..500 {
                    let tree = store.active_tree(FEVER).unwrap();
                    assert!(tree.version() == 1 || tree.version() == 2);
                    assert!(tree.tree().is_active);
                }
            })
        })
        .collect();

    for round in 0..100 {
        store.activate(FEVER, 1 + round % 2).unwrap();
    }
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(store.versions(FEVER), vec![1, 2]);
}

#[test]
fn hydrate_quarantines_tampered_active_versions() {
    let mut healthy = fever_tree(1);
    healthy.is_active = true;
    let mut tampered = common::tree_with_nodes("measles", 4, common::fever_nodes());
    tampered.is_active = true;
    tamper_diagnosis(&mut tampered, "no_fever", "measles excluded");

    let store = DecisionTreeStore::new();
    let report = store.hydrate(vec![healthy, fever_tree(2), tampered]).unwrap();

    assert_eq!(report.registered, 3);
    assert_eq!(report.activated, vec![(FEVER.to_string(), 1)]);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(store.active_version(FEVER), Some(1));
    assert!(matches!(
        store.active_tree("measles"),
        Err(TreeStoreError::Integrity(IntegrityError::SpecHashMismatch { .. }))
    ));
}

#[test]
fn sqlite_import_round_trips_as_inactive() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTreeRepository::try_new(&conn).unwrap();
    let mut tree = fever_tree(1);
    tree.is_active = true;

    repo.import_tree(&tree).unwrap();

    let loaded = repo.load_tree(FEVER, 1).unwrap().unwrap();
    tree.is_active = false;
    assert_eq!(loaded, tree);
    assert_eq!(repo.active_version(FEVER).unwrap(), None);
    assert!(matches!(
        repo.import_tree(&tree),
        Err(TreeRepoError::DuplicateVersion { version: 1, .. })
    ));
    assert!(repo.load_tree(FEVER, 2).unwrap().is_none());
}

#[test]
fn sqlite_activation_flips_exactly_one_version() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTreeRepository::try_new(&conn).unwrap();
    repo.import_tree(&fever_tree(1)).unwrap();
    repo.import_tree(&fever_tree(2)).unwrap();

    repo.activate(FEVER, 1).unwrap();
    let verified = repo.activate(FEVER, 2).unwrap();
    assert_eq!(verified.version(), 2);

    let versions = repo.list_versions(FEVER).unwrap();
    let active: Vec<u32> = versions
        .iter()
        .filter(|summary| summary.is_active)
        .map(|summary| summary.version)
        .collect();
    assert_eq!(active, vec![2]);
    assert_eq!(versions[0].node_count, common::fever_nodes().len());

    assert!(matches!(
        repo.activate(FEVER, 7),
        Err(TreeRepoError::VersionNotFound { version: 7, .. })
    ));
}

#[test]
fn sqlite_activation_rejects_hash_mismatch() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTreeRepository::try_new(&conn).unwrap();
    repo.import_tree(&fever_tree(1)).unwrap();
    repo.activate(FEVER, 1).unwrap();

    let mut tampered = fever_tree(2);
    tamper_diagnosis(&mut tampered, "persistent_fever", "nothing to see");
    repo.import_tree(&tampered).unwrap();

    assert!(matches!(
        repo.activate(FEVER, 2),
        Err(TreeRepoError::Integrity(IntegrityError::SpecHashMismatch { .. }))
    ));
    assert_eq!(repo.active_version(FEVER).unwrap(), Some(1));
}

#[test]
fn stored_versions_cannot_be_edited_in_place() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTreeRepository::try_new(&conn).unwrap();
    repo.import_tree(&fever_tree(1)).unwrap();

    let statements = [
        "UPDATE decision_trees SET spec_hash = replace(spec_hash, substr(spec_hash, 1, 1), 'f');",
        "UPDATE decision_trees SET approved_at = 0;",
        "DELETE FROM decision_trees;",
        "UPDATE decision_tree_nodes SET payload_json = '{}';",
        "DELETE FROM decision_tree_nodes;",
    ];
    for sql in statements {
        let err = conn.execute(sql, []).unwrap_err();
        assert!(
            err.to_string().contains("tree_version_immutable"),
            "`{sql}` failed with {err}"
        );
    }
    assert_eq!(repo.load_tree(FEVER, 1).unwrap().unwrap(), fever_tree(1));
}

#[test]
fn tampering_behind_dropped_triggers_is_caught_on_hydrate() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTreeRepository::try_new(&conn).unwrap();
    repo.import_tree(&fever_tree(1)).unwrap();
    repo.activate(FEVER, 1).unwrap();

    conn.execute_batch(
        "DROP TRIGGER trg_decision_tree_nodes_update_immutable;
         UPDATE decision_tree_nodes
         SET payload_json = replace(payload_json, 'no fever', 'all clear')
         WHERE node_id = 'no_fever';",
    )
    .unwrap();

    assert!(matches!(
        repo.activate(FEVER, 1),
        Err(TreeRepoError::Integrity(IntegrityError::SpecHashMismatch { .. }))
    ));

    let store = DecisionTreeStore::new();
    let report = store.hydrate(repo.load_all_trees().unwrap()).unwrap();
    assert!(report.activated.is_empty());
    assert_eq!(report.rejected.len(), 1);
    assert!(matches!(
        store.active_tree(FEVER),
        Err(TreeStoreError::Integrity(IntegrityError::SpecHashMismatch { .. }))
    ));
}

#[test]
fn malformed_trees_are_never_imported() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTreeRepository::try_new(&conn).unwrap();
    let mut tree = fever_tree(1);
    tree.nodes.retain(|node| node.id != "no_fever");

    assert!(matches!(
        repo.import_tree(&tree),
        Err(TreeRepoError::Integrity(IntegrityError::MalformedTree { .. }))
    ));
    assert!(repo.list_versions(FEVER).unwrap().is_empty());
}

#[test]
fn padded_answer_keys_cannot_reuse_a_published_hash() {
    let original = fever_tree(1);
    let mut padded = fever_tree(2);
    for node in &mut padded.nodes {
        if let NodeKind::EntryGate(step) = &mut node.kind {
            step.answer_key = "fever_onset ".to_string();
        }
    }
    assert_eq!(compute_spec_hash(&padded.nodes).unwrap(), original.spec_hash);

    let store = DecisionTreeStore::new();
    let err = store.register(padded.clone()).unwrap_err();
    assert!(matches!(
        err,
        TreeStoreError::Integrity(IntegrityError::MalformedTree {
            reason: TreeValidationError::NonCanonicalText { ref node_id, ref value },
            ..
        }) if node_id == "start" && value == "fever_onset "
    ));
    assert!(store.versions(FEVER).is_empty());

    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTreeRepository::try_new(&conn).unwrap();
    assert!(matches!(
        repo.import_tree(&padded),
        Err(TreeRepoError::Integrity(IntegrityError::MalformedTree { .. }))
    ));
    assert!(repo.list_versions(FEVER).unwrap().is_empty());
}

#[test]
fn nodes_cannot_be_appended_to_an_imported_version() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTreeRepository::try_new(&conn).unwrap();
    repo.import_tree(&fever_tree(1)).unwrap();

    let statements = [
        "INSERT INTO decision_tree_nodes (
            disease_id, version, node_id, node_type, position, payload_json
        ) VALUES ('fever', 1, 'extra', 'OUTCOME', 99, '{}');",
        "UPDATE decision_trees SET sealed = 0;",
    ];
    for sql in statements {
        let err = conn.execute(sql, []).unwrap_err();
        assert!(
            err.to_string().contains("tree_version_immutable"),
            "`{sql}` failed with {err}"
        );
    }
    assert_eq!(
        repo.list_versions(FEVER).unwrap()[0].node_count,
        common::fever_nodes().len()
    );
}

#[test]
fn versions_written_outside_import_are_never_activated() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTreeRepository::try_new(&conn).unwrap();
    repo.import_tree(&fever_tree(1)).unwrap();

    conn.execute_batch(
        "INSERT INTO decision_trees (disease_id, version, is_active, approved_at, spec_hash)
         SELECT disease_id, 3, 0, approved_at, spec_hash
         FROM decision_trees
         WHERE disease_id = 'fever' AND version = 1;
         INSERT INTO decision_tree_nodes (
             disease_id, version, node_id, node_type, position, payload_json
         )
         SELECT disease_id, 3, node_id, node_type, position, payload_json
         FROM decision_tree_nodes
         WHERE disease_id = 'fever' AND version = 1;",
    )
    .unwrap();

    assert!(matches!(
        repo.activate(FEVER, 3),
        Err(TreeRepoError::InvalidData(_))
    ));
    assert_eq!(repo.active_version(FEVER).unwrap(), None);
}
