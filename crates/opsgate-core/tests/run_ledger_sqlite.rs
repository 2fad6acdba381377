use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use time::macros::datetime;

use opsgate_core::ledger::RunLedger;
use opsgate_core::models::{ActionId, CoreErrorKind, ProjectId, RunId, RunRecord, RunStatus};
use opsgate_core::persistence::{ActionFamily, MigrationStore, RunFilter, RunStore};
use opsgate_core::sqlite::{SqliteRunStore, current_schema_version};

fn record(run_id: &str, project: &str, action: &str) -> RunRecord {
    let started_at = datetime!(2026-05-01 10:00:00 UTC);
    RunRecord {
        run_id: RunId::parse(run_id).unwrap(),
        project_id: ProjectId::from(project),
        action: ActionId::from(action),
        started_at,
        finished_at: started_at + Duration::from_secs(42),
        status: RunStatus::Failure,
        exit_code: Some(3),
        duration_ms: 42_000,
        error_summary: Some("LOGIN_REQUIRED: session expired".to_string()),
        artifact_paths: vec![
            PathBuf::from("/var/opsgate/artifacts/a"),
            PathBuf::from("/var/opsgate/artifacts/a/result.json"),
        ],
    }
}

fn migrated_store(dir: &tempfile::TempDir) -> SqliteRunStore {
    let store = SqliteRunStore::new(dir.path().join("ledger.sqlite3"));
    store.migrate_to_latest().unwrap();
    store
}

#[test]
fn migrations_reach_latest_and_roll_back() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteRunStore::new(dir.path().join("ledger.sqlite3"));
    assert_eq!(store.current_version().unwrap(), 0);
    assert_eq!(store.planned_migrations(0).len() as i64, current_schema_version());

    store.migrate_to_latest().unwrap();
    assert_eq!(store.current_version().unwrap(), current_schema_version());

    store.apply_migration(0).unwrap();
    assert_eq!(store.current_version().unwrap(), 0);
    assert!(store.apply_migration(current_schema_version() + 1).is_err());
}

#[test]
fn unmigrated_database_is_a_storage_failure() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteRunStore::new(dir.path().join("ledger.sqlite3"));

    let error = store.append(&record("20260501T100000Z-0001", "alpha", "deploy")).unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::StorageFailure);
}

#[test]
fn record_round_trips_with_artifact_paths_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = migrated_store(&dir);
    let original = record("20260501T100000Z-0001", "alpha", "session_login");

    store.append(&original).unwrap();
    assert_eq!(store.get(&original.run_id).unwrap(), Some(original));
}

#[test]
fn duplicate_insert_never_overwrites() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = RunLedger::new(Arc::new(migrated_store(&dir)));
    let original = record("20260501T100000Z-0001", "alpha", "deploy");
    let mut duplicate = original.clone();
    duplicate.status = RunStatus::Success;

    assert!(ledger.write(&original).is_some());
    assert_eq!(ledger.write(&duplicate), None);
    assert_eq!(ledger.read("20260501T100000Z-0001"), Some(original));
}

#[test]
fn listing_orders_by_run_id_and_filters() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = RunLedger::new(Arc::new(migrated_store(&dir)));
    ledger.write(&record("20260501T100000Z-0001", "alpha", "session_login"));
    ledger.write(&record("20260501T130000Z-0004", "alpha", "deploy"));
    ledger.write(&record("20260501T110000Z-0002", "beta", "session_check"));
    ledger.write(&record("20260501T120000Z-0003", "alpha", "session_check"));

    let newest: Vec<String> = ledger
        .list(3)
        .into_iter()
        .map(|record| record.run_id.to_string())
        .collect();
    assert_eq!(
        newest,
        vec![
            "20260501T130000Z-0004".to_string(),
            "20260501T120000Z-0003".to_string(),
            "20260501T110000Z-0002".to_string(),
        ]
    );

    let alpha_sessions = ledger.list_matching(
        &RunFilter::all()
            .project(ProjectId::from("alpha"))
            .family(ActionFamily::Prefix("session_".to_string())),
        10,
    );
    let ids: Vec<&str> = alpha_sessions
        .iter()
        .map(|record| record.run_id.as_str())
        .collect();
    assert_eq!(ids, vec!["20260501T120000Z-0003", "20260501T100000Z-0001"]);
    assert_eq!(alpha_sessions[0].artifact_paths.len(), 2);
}
