//! Copy-based migration to a new identity's session directory.

use std::fs;

use session_warden::models::identity::{IdentitySource, IdentityStrategy, InstanceIdentity};
use session_warden::models::migration::MigrationAction;
use session_warden::session::migrator::MigrateOptions;
use session_warden::session::SessionStore;
use tempfile::tempdir;

use super::test_helpers::{memory_logger, populate_session, populate_skeleton, test_config};

fn team(id: &str) -> InstanceIdentity {
    InstanceIdentity {
        strategy: IdentityStrategy::Team,
        id: id.into(),
        source: IdentitySource::EnvVar,
    }
}

#[tokio::test]
async fn session_is_copied_and_source_kept() {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let source = base.join(".auth_shared");
    populate_session(&source, 3);
    let store = SessionStore::from_config(&test_config(base), &memory_logger().0).expect("store");

    let result = store
        .migrator()
        .migrate(base, &team("qa"), MigrateOptions::default())
        .await;

    assert_eq!(result.action, MigrationAction::Migrated);
    assert!(result.success());
    assert_eq!(result.strategy, IdentityStrategy::Team);
    assert_eq!(result.chosen_source, Some(source.clone()));
    assert_eq!(result.preserved_count, 8);

    let target = base.join(".auth_qa");
    assert_eq!(result.target_path, target);
    assert!(target.join("session/Default/Cookies").exists());
    assert!(source.join("session/Default/Cookies").exists());

    let backup = result.backup_path.expect("backup taken");
    assert!(backup.starts_with(base.join("backups")));
    assert!(backup.join("session/Local State").exists());
}

#[tokio::test]
async fn backup_can_be_skipped() {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    populate_session(&base.join(".auth_shared"), 0);
    let store = SessionStore::from_config(&test_config(base), &memory_logger().0).expect("store");

    let result = store
        .migrator()
        .migrate(base, &team("qa"), MigrateOptions { backup: false })
        .await;

    assert_eq!(result.action, MigrationAction::Migrated);
    assert!(result.backup_path.is_none());
    assert!(!base.join("backups").exists());
}

#[tokio::test]
async fn existing_target_is_already_migrated() {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    populate_session(&base.join(".auth_shared"), 0);
    fs::create_dir(base.join(".auth_qa")).expect("mkdir");
    let store = SessionStore::from_config(&test_config(base), &memory_logger().0).expect("store");

    let result = store
        .migrator()
        .migrate(base, &team("qa"), MigrateOptions::default())
        .await;

    assert_eq!(result.action, MigrationAction::AlreadyMigrated);
    assert!(result.chosen_source.is_none());
    assert!(fs::read_dir(base.join(".auth_qa")).expect("read").next().is_none());
}

#[tokio::test]
async fn nothing_to_copy_leaves_fresh_start() {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let store = SessionStore::from_config(&test_config(base), &memory_logger().0).expect("store");

    let result = store
        .migrator()
        .migrate(base, &team("qa"), MigrateOptions::default())
        .await;

    assert_eq!(result.action, MigrationAction::NoSource);
    assert!(result.success());
    assert!(!base.join(".auth_qa").exists());
}

#[tokio::test]
async fn invalid_copy_is_discarded_and_source_untouched() {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let source = base.join(".auth_shared");
    populate_skeleton(&source);
    let (logger, log) = memory_logger();
    let store = SessionStore::from_config(&test_config(base), &logger).expect("store");

    let result = store
        .migrator()
        .migrate(base, &team("qa"), MigrateOptions { backup: false })
        .await;

    assert_eq!(result.action, MigrationAction::Failed);
    assert!(!result.success());
    assert_eq!(result.preserved_count, 0);
    assert!(result.errors.iter().any(|e| e.starts_with("target invalid")));
    assert!(!base.join(".auth_qa").exists());
    assert!(source.join("session/Default/Preferences").exists());
    assert!(log.contains("migrator", "migration failed, source kept"));
}
