//! Escalating recovery of damaged session directories.

use std::fs;
use std::time::Duration;

use session_warden::models::recovery::{RecoveryLevel, RecoveryOptions, Severity};
use session_warden::session::SessionStore;
use tempfile::tempdir;

use super::test_helpers::{age_file, memory_logger, populate_session, test_config};

fn options() -> RecoveryOptions {
    RecoveryOptions {
        auto_backup_before_recovery: true,
        validate_after_recovery: true,
        max_recovery_time_ms: 10_000,
    }
}

fn store(base: &std::path::Path) -> SessionStore {
    SessionStore::from_config(&test_config(base), &memory_logger().0).expect("store")
}

#[tokio::test]
async fn missing_optional_file_is_fixed_by_the_lightest_level() {
    let dir = tempdir().expect("tempdir");
    let session = dir.path().join(".auth_shared");
    populate_session(&session, 0);
    fs::remove_file(session.join("session/Local State")).expect("remove");

    let outcome = store(dir.path()).recovery().recover(&session, options()).await;

    assert_eq!(outcome.severity, Severity::Minor);
    assert!(outcome.performed);
    assert!(outcome.success);
    assert_eq!(outcome.level_applied, Some(RecoveryLevel::PruneArtifacts));
    assert!(!outcome.requires_reauth);
    assert!(!outcome.backup_created);
    assert!(session.join("session/Default/Cookies").exists());
}

#[tokio::test]
async fn stale_artifacts_are_pruned() {
    let dir = tempdir().expect("tempdir");
    let session = dir.path().join(".auth_shared");
    populate_session(&session, 0);
    let artifact = session.join("session/SingletonLock");
    fs::write(&artifact, "host-1").expect("artifact");
    age_file(&artifact, Duration::from_secs(7200));

    let outcome = store(dir.path()).recovery().recover(&session, options()).await;

    assert!(outcome.success);
    assert_eq!(outcome.level_applied, Some(RecoveryLevel::PruneArtifacts));
    assert!(!artifact.exists());
    assert!(outcome.validation_after.is_some_and(|r| r.is_valid));
}

#[tokio::test]
async fn unrepairable_major_damage_escalates_to_reset() {
    let dir = tempdir().expect("tempdir");
    let session = dir.path().join(".auth_shared");
    populate_session(&session, 0);
    fs::remove_dir_all(session.join("session/Default/IndexedDB")).expect("remove idb");

    let outcome = store(dir.path()).recovery().recover(&session, options()).await;

    assert_eq!(outcome.severity, Severity::Major);
    assert_eq!(outcome.level_applied, Some(RecoveryLevel::FullReset));
    assert!(outcome.success);
    assert!(outcome.requires_reauth);
    assert!(outcome.backup_created);
    assert!(outcome
        .backup_path
        .as_ref()
        .is_some_and(|p| p.join("session/Default/Cookies").exists()));
    assert!(!session.exists());
}

#[tokio::test]
async fn failed_backup_limits_recovery_to_pruning() {
    let dir = tempdir().expect("tempdir");
    let session = dir.path().join(".auth_shared");
    populate_session(&session, 0);
    fs::remove_dir_all(session.join("session/Default/IndexedDB")).expect("remove idb");
    fs::write(dir.path().join("backups"), "not a directory").expect("block backups");

    let outcome = store(dir.path()).recovery().recover(&session, options()).await;

    assert!(!outcome.success);
    assert!(!outcome.backup_created);
    assert_eq!(outcome.level_applied, Some(RecoveryLevel::PruneArtifacts));
    assert!(outcome.notes.iter().any(|n| n.starts_with("backup failed")));
    assert!(session.join("session/Default/Cookies").exists());
}

#[tokio::test]
async fn zero_budget_times_out_without_touching_anything() {
    let dir = tempdir().expect("tempdir");
    let session = dir.path().join(".auth_shared");
    populate_session(&session, 0);
    fs::remove_dir_all(session.join("session/Default/IndexedDB")).expect("remove idb");

    let outcome = store(dir.path())
        .recovery()
        .recover(
            &session,
            RecoveryOptions {
                max_recovery_time_ms: 0,
                ..options()
            },
        )
        .await;

    assert!(outcome.timed_out);
    assert!(!outcome.success);
    assert!(!outcome.performed);
    assert!(session.exists());
}

#[tokio::test]
async fn healthy_session_needs_no_recovery() {
    let dir = tempdir().expect("tempdir");
    let session = dir.path().join(".auth_shared");
    populate_session(&session, 0);

    let outcome = store(dir.path()).recovery().recover(&session, options()).await;

    assert_eq!(outcome.severity, Severity::None);
    assert!(outcome.success);
    assert!(!outcome.performed);
}

#[tokio::test]
async fn missing_directory_is_never_repaired() {
    let dir = tempdir().expect("tempdir");
    let outcome = store(dir.path())
        .recovery()
        .recover(&dir.path().join(".auth_shared"), options())
        .await;

    assert!(!outcome.performed);
    assert!(outcome.level_applied.is_none());
    assert!(outcome.notes.iter().any(|n| n.contains("does not exist")));
}

#[tokio::test]
async fn full_reset_removes_the_directory() {
    let dir = tempdir().expect("tempdir");
    let session = dir.path().join(".auth_shared");
    populate_session(&session, 0);
    let store = store(dir.path());

    store.recovery().full_reset(&session).await.expect("reset");
    assert!(!session.exists());
    store.recovery().full_reset(&session).await.expect("idempotent");
}
