//! End-to-end tests for the checkpointed scan driver and the export tail
//!
//! These exercise the full path an export script takes: scan regions with
//! per-region error recovery, crash and resume from the checkpoint, then
//! prepare/sanitize/validate/write and clean the checkpoint up.

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use stratus::boundary::ScanError;
use stratus::checkpoint::CheckpointStore;
use stratus::export::writer::CsvWriter;
use stratus::export::Record;
use stratus::scan::{ExportRequest, RegionScan};

fn regions(names: &[&str]) -> Vec<String> {
    names.iter().map(|r| r.to_string()).collect()
}

fn instance(region: &str, name: &str) -> Record {
    [
        ("Name".to_string(), json!(name)),
        ("Region".to_string(), json!(region)),
        ("State".to_string(), json!("running")),
    ]
    .into_iter()
    .collect()
}

#[tokio::test]
async fn interrupted_scan_resumes_where_it_left_off() {
    let dir = tempfile::tempdir().unwrap();
    let regions = regions(&["us-east-1", "us-east-2", "us-west-1", "us-west-2"]);

    // First run dies on the third region with a credential failure, which
    // the boundary never swallows.
    let scan = RegionScan::new("ec2-describe", "ec2").checkpoint_dir(dir.path());
    let result = scan
        .run(&regions, |region| async move {
            if region == "us-west-1" {
                Err(ScanError::Credential("token expired".to_string()).into())
            } else {
                Ok(vec![instance(&region, "web")])
            }
        })
        .await;
    assert!(result.is_err());
    assert!(dir.path().join("ec2-describe.json").exists());

    // Second run picks up from the last saved index instead of region 0.
    let visited: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let scan = RegionScan::new("ec2-describe", "ec2").checkpoint_dir(dir.path());
    let outcome = scan
        .run(&regions, |region| {
            let visited = visited.clone();
            async move {
                visited.lock().unwrap().push(region.clone());
                Ok(vec![instance(&region, "web")])
            }
        })
        .await
        .unwrap();

    assert!(outcome.resumed_from > 0);
    let visited = visited.lock().unwrap().clone();
    assert_eq!(visited.len(), regions.len() - outcome.resumed_from);
    assert_eq!(visited.last().map(String::as_str), Some("us-west-2"));

    // Records collected before the crash are restored from the checkpoint;
    // the outcome covers every region, not just the resumed tail.
    assert_eq!(outcome.records.len(), regions.len());

    // Export succeeds, contains all regions' rows, and removes the
    // checkpoint.
    let path = dir.path().join("output").join("export.csv");
    let written = outcome
        .export(&ExportRequest::new("ec2"), &CsvWriter, &path)
        .unwrap();
    assert_eq!(written, Some(path.clone()));
    assert!(!dir.path().join("ec2-describe.json").exists());

    let content = std::fs::read_to_string(&path).unwrap();
    for region in &regions {
        assert!(content.contains(region.as_str()), "{region} missing from export");
    }
}

#[tokio::test]
async fn checkpoint_without_restorable_records_restarts_the_scan() {
    let dir = tempfile::tempdir().unwrap();
    let regions = regions(&["us-east-1", "us-east-2", "us-west-2"]);

    // A checkpoint whose payload carries no records (older layout, manual
    // edit) cannot be resumed without losing data.
    let mut store = CheckpointStore::open_in(dir.path(), "legacy-scan", 3).unwrap();
    store.save(2, json!({ "last_region": "us-east-2" })).unwrap();
    drop(store);

    let visited: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let scan = RegionScan::new("legacy-scan", "ec2").checkpoint_dir(dir.path());
    let outcome = scan
        .run(&regions, |region| {
            let visited = visited.clone();
            async move {
                visited.lock().unwrap().push(region.clone());
                Ok(vec![instance(&region, "web")])
            }
        })
        .await
        .unwrap();

    assert_eq!(outcome.resumed_from, 0);
    assert_eq!(visited.lock().unwrap().len(), regions.len());
    assert_eq!(outcome.records.len(), regions.len());
}

#[tokio::test]
async fn failed_region_is_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let regions = regions(&["us-east-1", "us-east-2", "us-west-2"]);

    let scan = RegionScan::new("vpc-scan", "ec2").checkpoint_dir(dir.path());
    let outcome = scan
        .run(&regions, |region| async move {
            if region == "us-east-2" {
                Err(ScanError::Api {
                    service: "ec2".to_string(),
                    code: "AccessDenied".to_string(),
                    message: "not authorized in this region".to_string(),
                }
                .into())
            } else {
                Ok(vec![instance(&region, "vpc-a")])
            }
        })
        .await
        .unwrap();

    assert_eq!(outcome.regions_failed, 1);
    assert_eq!(outcome.records.len(), 2);
    assert_eq!(outcome.resumed_from, 0);
}

#[tokio::test]
async fn sensitive_columns_are_masked_in_the_written_file() {
    let dir = tempfile::tempdir().unwrap();
    let regions = regions(&["us-east-1"]);

    let scan = RegionScan::new("secrets-scan", "ec2").checkpoint_dir(dir.path());
    let outcome = scan
        .run(&regions, |region| async move {
            Ok(vec![
                [
                    ("Name".to_string(), json!("web-1")),
                    ("SecretToken".to_string(), json!("s3cr3t-value-1")),
                    ("LaunchTime".to_string(), json!("2024-03-01T12:30:45+02:00")),
                    ("Region".to_string(), json!(region)),
                ]
                .into_iter()
                .collect::<Record>(),
                [
                    ("Name".to_string(), json!("web-2")),
                    ("SecretToken".to_string(), json!("s3cr3t-value-2")),
                    ("Missing".to_string(), Value::Null),
                ]
                .into_iter()
                .collect::<Record>(),
            ])
        })
        .await
        .unwrap();

    let path = dir.path().join("export.csv");
    let request = ExportRequest::new("ec2").required_columns(&["Name", "SecretToken"]);
    outcome.export(&request, &CsvWriter, &path).unwrap().unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("***MASKED***"));
    assert!(!content.contains("s3cr3t"));
    assert!(content.contains("web-1"));
    // Timezone stripped, null filled.
    assert!(content.contains("2024-03-01 12:30:45"));
    assert!(content.contains("N/A"));
}

#[tokio::test]
async fn dry_run_writes_nothing_and_keeps_the_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let regions = regions(&["us-east-1"]);

    let scan = RegionScan::new("dry-scan", "ec2").checkpoint_dir(dir.path());
    let outcome = scan
        .run(&regions, |region| async move {
            Ok(vec![instance(&region, "web")])
        })
        .await
        .unwrap();

    let path = dir.path().join("export.csv");
    let request = ExportRequest::new("ec2").dry_run(true);
    let written = outcome.export(&request, &CsvWriter, &path).unwrap();

    assert_eq!(written, None);
    assert!(!path.exists());
    assert!(dir.path().join("dry-scan.json").exists());
}

#[tokio::test]
async fn missing_required_column_blocks_the_export() {
    let dir = tempfile::tempdir().unwrap();
    let regions = regions(&["us-east-1"]);

    let scan = RegionScan::new("strict-scan", "ec2").checkpoint_dir(dir.path());
    let outcome = scan
        .run(&regions, |region| async move {
            Ok(vec![instance(&region, "web")])
        })
        .await
        .unwrap();

    let path = dir.path().join("export.csv");
    let request = ExportRequest::new("ec2").required_columns(&["InstanceId"]);
    let written = outcome.export(&request, &CsvWriter, &path).unwrap();

    assert_eq!(written, None);
    assert!(!path.exists());
    // The checkpoint stays so the operator can fix the request and re-export.
    assert!(dir.path().join("strict-scan.json").exists());
}

#[tokio::test]
async fn completed_scan_without_export_cleanup_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let regions = regions(&["us-east-1", "us-east-2"]);

    // Finish a scan but leave the checkpoint behind (dry run).
    let scan = RegionScan::new("stale-scan", "ec2").checkpoint_dir(dir.path());
    let outcome = scan
        .run(&regions, |region| async move {
            Ok(vec![instance(&region, "web")])
        })
        .await
        .unwrap();
    let request = ExportRequest::new("ec2").dry_run(true);
    outcome
        .export(&request, &CsvWriter, &dir.path().join("x.csv"))
        .unwrap();

    // The records from the finished run are gone; the next run starts over.
    let visited: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let scan = RegionScan::new("stale-scan", "ec2").checkpoint_dir(dir.path());
    let outcome = scan
        .run(&regions, |region| {
            let visited = visited.clone();
            async move {
                visited.lock().unwrap().push(region.clone());
                Ok(vec![instance(&region, "web")])
            }
        })
        .await
        .unwrap();

    assert_eq!(outcome.resumed_from, 0);
    assert_eq!(visited.lock().unwrap().len(), regions.len());
    assert_eq!(outcome.records.len(), regions.len());
}
