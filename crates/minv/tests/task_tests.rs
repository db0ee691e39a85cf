//! Registered tasks run through the registry with job bookkeeping.

mod common;

use serde_json::json;

use common::{index_name, TestHarness, FILE_TYPE, MISSION};
use minv::config::CollectionConfig;
use minv::db::{job_repo, scheduled_job_repo};
use minv::error::{ExportError, TaskError};
use minv::inventory::{CollectionLock, HarvestSummary};
use minv::tasks::Registry;

const URL: &str = "http://nga.example/listing/";

fn registry(harness: &TestHarness) -> Registry {
    let mut registry = Registry::new(harness.ctx.clone());
    registry
        .initialize(&["inventory".to_string(), "backup".to_string()])
        .unwrap();
    registry
}

fn only_job(harness: &TestHarness) -> job_repo::JobRow {
    let jobs = job_repo::list(&harness.db, &Default::default()).unwrap();
    assert_eq!(jobs.len(), 1);
    jobs.into_iter().next().unwrap()
}

#[test]
fn test_harvest_task_records_finished_job_and_reschedules() {
    let harness = TestHarness::with_config(CollectionConfig {
        harvest_interval: Some("PT6H".to_string()),
        ..CollectionConfig::default()
    });
    harness.add_location(URL, "nga");
    harness.harvesters.serve(URL, &index_name(1, 1), "filename\nA.N1\n");
    harness.harvesters.serve_broken(URL, &index_name(2, 2));

    let result = registry(&harness)
        .run(
            "harvest",
            json!({"mission": MISSION, "file_type": FILE_TYPE, "url": URL, "reschedule": true}),
        )
        .unwrap();

    let summary: HarvestSummary = serde_json::from_value(result).unwrap();
    assert_eq!(summary.inserted.len(), 2);
    assert_eq!(summary.failed_retrieve, vec![index_name(2, 2)]);
    assert_eq!(summary.records, 1);

    let job = only_job(&harness);
    assert_eq!(job.status, "finished");
    assert!(job.end_time.unwrap() >= job.start_time.unwrap());

    let scheduled = scheduled_job_repo::list_by_task(&harness.db, "harvest").unwrap();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(harness.notifier.reloads(), 1);
}

#[test]
fn test_export_task_fails_job_on_contention() {
    let harness = TestHarness::new();
    let _held = CollectionLock::for_collection(&harness.settings, MISSION, FILE_TYPE)
        .acquire()
        .unwrap();

    let err = registry(&harness)
        .run("export", json!({"mission": MISSION, "file_type": FILE_TYPE}))
        .unwrap_err();
    assert!(matches!(err, TaskError::Export(ExportError::Lock(_))));

    let job = only_job(&harness);
    assert_eq!(job.status, "failed");
    assert!(job.error.is_some_and(|e| !e.is_empty()));
    assert!(job.traceback.is_some());
    assert!(job.end_time.unwrap() >= job.start_time.unwrap());
}

#[test]
fn test_export_after_harvest_contains_index_files() {
    let harness = TestHarness::new();
    harness.add_location(URL, "nga");
    harness.harvesters.serve(URL, &index_name(1, 1), "filename\nA.N1\n");
    let registry = registry(&harness);
    registry
        .run(
            "harvest",
            json!({"mission": MISSION, "file_type": FILE_TYPE, "url": URL}),
        )
        .unwrap();

    let out = harness.root().join("export.zip");
    let result = registry
        .run(
            "export",
            json!({"mission": MISSION, "file_type": FILE_TYPE, "filename": out}),
        )
        .unwrap();
    assert_eq!(result, json!(out));

    let archive = zip::ZipArchive::new(std::fs::File::open(&out).unwrap()).unwrap();
    let expected = format!("locations/http-nga-example-listing/{}", index_name(1, 1));
    assert!(archive.file_names().any(|n| n == expected));
}

#[test]
fn test_backup_task_with_invalid_arguments() {
    let harness = TestHarness::new();
    let err = registry(&harness)
        .run("backup", json!({"logs": "yes please"}))
        .unwrap_err();
    assert!(matches!(err, TaskError::InvalidArguments { .. }));
    assert_eq!(only_job(&harness).status, "failed");
}

#[test]
fn test_backup_task_writes_archive() {
    let harness = TestHarness::new();
    let out = harness.root().join("backup.zip");
    registry(&harness)
        .run("backup", json!({"config": true, "out_path": out}))
        .unwrap();
    assert!(out.is_file());
    assert_eq!(only_job(&harness).status, "finished");
}
