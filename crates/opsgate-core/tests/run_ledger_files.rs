use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use time::OffsetDateTime;
use time::macros::datetime;

use opsgate_core::ledger::RunLedger;
use opsgate_core::models::{ActionId, ProjectId, RunId, RunRecord, RunStatus};
use opsgate_core::persistence::{ActionFamily, FileRunStore, RunFilter, RunStore};

fn record(run_id: &str, project: &str, action: &str, status: RunStatus) -> RunRecord {
    let started_at: OffsetDateTime = datetime!(2026-05-01 10:00:00 UTC);
    RunRecord {
        run_id: RunId::parse(run_id).unwrap(),
        project_id: ProjectId::from(project),
        action: ActionId::from(action),
        started_at,
        finished_at: started_at + Duration::from_millis(1_250),
        status,
        exit_code: match status {
            RunStatus::Success => Some(0),
            RunStatus::Failure => Some(1),
            RunStatus::Error => None,
        },
        duration_ms: 1_250,
        error_summary: (status != RunStatus::Success).then(|| "selector not found".to_string()),
        artifact_paths: vec![PathBuf::from("/var/opsgate/artifacts/20260501T100000Z")],
    }
}

#[test]
fn written_record_reads_back_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = RunLedger::files(dir.path());
    let original = record("20260501T100000Z-00a1", "alpha", "deploy", RunStatus::Failure);

    assert_eq!(ledger.write(&original), Some(original.run_id.clone()));
    assert_eq!(ledger.read("20260501T100000Z-00a1"), Some(original));
}

#[test]
fn duplicate_run_id_is_refused_and_original_kept() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = RunLedger::files(dir.path());
    let original = record("20260501T100000Z-00a1", "alpha", "deploy", RunStatus::Success);
    let imposter = record("20260501T100000Z-00a1", "beta", "backtest", RunStatus::Error);

    assert!(ledger.write(&original).is_some());
    assert_eq!(ledger.write(&imposter), None);
    assert_eq!(ledger.read(original.run_id.as_str()), Some(original));
}

#[test]
fn write_leaves_no_staging_files_behind() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = RunLedger::files(dir.path());
    ledger.write(&record("20260501T100000Z-00a1", "alpha", "deploy", RunStatus::Success));
    ledger.write(&record("20260501T100000Z-00a1", "alpha", "deploy", RunStatus::Success));

    let names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["20260501T100000Z-00a1.json".to_string()]);
}

#[test]
fn traversal_run_ids_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let ledger_root = dir.path().join("ledger");
    let ledger = RunLedger::files(&ledger_root);
    fs::write(dir.path().join("secret.json"), b"{}").unwrap();

    for raw in ["../secret", "..", "a/b", "", "run_1", "20260501T100000Z-00a1.json"] {
        assert_eq!(ledger.read(raw), None, "expected '{raw}' to be rejected");
    }
}

#[test]
fn write_failure_is_reported_without_panicking() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-directory");
    fs::write(&blocker, b"occupied").unwrap();
    let ledger = RunLedger::files(&blocker);

    let outcome = ledger.write(&record("20260501T100000Z-00a1", "alpha", "deploy", RunStatus::Success));
    assert_eq!(outcome, None);
    assert!(ledger.list(10).is_empty());
}

#[test]
fn listing_is_newest_first_and_respects_limit() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = RunLedger::files(dir.path());
    for run_id in [
        "20260501T100000Z-0001",
        "20260501T120000Z-0003",
        "20260501T110000Z-0002",
    ] {
        ledger.write(&record(run_id, "alpha", "deploy", RunStatus::Success));
    }

    let listed: Vec<String> = ledger
        .list(2)
        .into_iter()
        .map(|record| record.run_id.to_string())
        .collect();
    assert_eq!(
        listed,
        vec![
            "20260501T120000Z-0003".to_string(),
            "20260501T110000Z-0002".to_string()
        ]
    );
    assert!(ledger.list(0).is_empty());
}

#[test]
fn listing_filters_by_project_and_action_family() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = RunLedger::files(dir.path());
    ledger.write(&record("20260501T100000Z-0001", "alpha", "session_login", RunStatus::Success));
    ledger.write(&record("20260501T110000Z-0002", "beta", "session_check", RunStatus::Failure));
    ledger.write(&record("20260501T120000Z-0003", "alpha", "deploy", RunStatus::Success));

    let alpha = ledger.list_for_project(&ProjectId::from("alpha"), 10);
    assert_eq!(alpha.len(), 2);
    assert!(alpha.iter().all(|record| record.project_id.as_str() == "alpha"));

    let sessions = ActionFamily::Prefix("session_".to_string());
    let latest = ledger.latest_for_action_family(&sessions).unwrap();
    assert_eq!(latest.run_id.as_str(), "20260501T110000Z-0002");

    let alpha_sessions = ledger.list_matching(
        &RunFilter::all()
            .project(ProjectId::from("alpha"))
            .family(sessions),
        10,
    );
    assert_eq!(alpha_sessions.len(), 1);
    assert_eq!(alpha_sessions[0].action.as_str(), "session_login");

    let members = ActionFamily::members(["deploy", "backtest"]);
    assert_eq!(ledger.list_for_action_family(&members, 10).len(), 1);
}

#[test]
fn corrupt_records_are_skipped_when_listing() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileRunStore::new(dir.path());
    let ledger = RunLedger::files(dir.path());
    ledger.write(&record("20260501T100000Z-0001", "alpha", "deploy", RunStatus::Success));
    fs::write(dir.path().join("20260501T110000Z-0002.json"), b"{\"run_id\": ").unwrap();
    fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

    let listed = ledger.list(10);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].run_id.as_str(), "20260501T100000Z-0001");

    assert_eq!(ledger.read("20260501T110000Z-0002"), None);
    let corrupt = RunId::parse("20260501T110000Z-0002").unwrap();
    assert!(store.get(&corrupt).is_err());
}
