//! tests/oplog_tests.rs
//! The run log is a JSON-lines file named after the run id.
//! Own test binary: it installs the global subscriber.

use std::fs;

use pii_rekey::config::LoggingSettings;
use pii_rekey::{oplog, RunId};
use serde_json::Value;
use tempfile::tempdir;

#[test]
fn init_writes_json_lines_per_run() {
    let dir = tempdir().unwrap();
    let settings = LoggingSettings {
        dir: dir.path().join("logs"),
        level: "info".into(),
    };
    let run_id = RunId::from("20250101T000000Z-cafebabe");

    let path = oplog::init(&settings, &run_id).unwrap();
    assert_eq!(path, dir.path().join("logs/20250101T000000Z-cafebabe.log"));

    tracing::warn!(phase = "backup", table = "contacts", "audit probe");

    let text = fs::read_to_string(&path).unwrap();
    let line = text
        .lines()
        .find(|l| l.contains("audit probe"))
        .expect("event written to run log");
    let event: Value = serde_json::from_str(line).unwrap();
    assert_eq!(event["level"], "WARN");
    assert_eq!(event["fields"]["phase"], "backup");
    assert_eq!(event["fields"]["table"], "contacts");
    assert!(event["timestamp"].is_string());

    // a second subscriber cannot be installed in the same process
    assert!(oplog::init(&settings, &RunId::generate()).is_err());
}
