//! Contract tests for the on-disk lock file format.
//!
//! Lock files are read by every process sharing a base directory,
//! including older releases that only understand a bare PID.

use chrono::{TimeZone, Utc};
use serde_json::Value;
use session_warden::models::lock::LockRecord;

#[test]
fn structured_record_uses_camel_case_keys() {
    let record = LockRecord::for_process(4242, Some("feature-login".into()));
    let json: Value =
        serde_json::from_str(&record.to_file_contents().expect("serialize")).expect("json");

    assert_eq!(json["pid"], 4242);
    assert!(json["timestamp"].is_i64());
    assert_eq!(json["instanceId"], "feature-login");
    assert_eq!(json["platform"], std::env::consts::OS);
    assert_eq!(json["runtimeVersion"], env!("CARGO_PKG_VERSION"));
    assert!(json.get("instance_id").is_none());
    assert!(json.get("runtime_version").is_none());
}

#[test]
fn timestamp_is_epoch_milliseconds() {
    let record = LockRecord::for_process(1, None);
    let json: Value =
        serde_json::from_str(&record.to_file_contents().expect("serialize")).expect("json");
    assert_eq!(
        json["timestamp"].as_i64(),
        Some(record.acquired_at().timestamp_millis())
    );
}

#[test]
fn minimal_record_from_another_writer_is_accepted() {
    let fallback = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single().expect("date");
    let record =
        LockRecord::parse(r#"{"pid":77,"timestamp":1700000000000}"#, fallback).expect("parse");

    assert_eq!(record.owner_pid(), 77);
    assert_eq!(record.acquired_at().timestamp_millis(), 1_700_000_000_000);
    assert_eq!(record.instance_id(), None);
    assert!(!record.is_legacy());
}

#[test]
fn bare_pid_files_stay_readable() {
    let modified = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("date");
    let record = LockRecord::parse("31337\n", modified).expect("parse");

    assert!(record.is_legacy());
    assert_eq!(record.owner_pid(), 31337);
    assert_eq!(record.acquired_at(), modified);
}

#[test]
fn legacy_records_are_rewritten_as_json() {
    let modified = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("date");
    let record = LockRecord::parse("31337", modified).expect("parse");
    let json: Value =
        serde_json::from_str(&record.to_file_contents().expect("serialize")).expect("json");

    assert_eq!(json["pid"], 31337);
    assert_eq!(json["timestamp"].as_i64(), Some(modified.timestamp_millis()));
}
