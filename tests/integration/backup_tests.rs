//! Backup creation and count-based retention.

use std::fs;

use session_warden::session::backup::BackupStore;
use tempfile::tempdir;

use super::test_helpers::{memory_logger, populate_session};

#[tokio::test]
async fn backups_beyond_the_retention_count_are_pruned() {
    let dir = tempdir().expect("tempdir");
    let source = dir.path().join(".auth_shared");
    populate_session(&source, 0);
    let store = BackupStore::new(dir.path().join("backups"), 2, memory_logger().0);

    let first = store.create(&source).await.expect("first");
    let second = store.create(&source).await.expect("second");
    let third = store.create(&source).await.expect("third");

    let listed: Vec<_> = store.list().await.expect("list").into_iter().map(|e| e.path).collect();
    assert_eq!(listed, vec![third.clone(), second.clone()]);
    assert!(!first.exists());
    assert!(third.join("session/Default/Cookies").exists());
}

#[tokio::test]
async fn retention_is_per_session_directory() {
    let dir = tempdir().expect("tempdir");
    let shared = dir.path().join(".auth_shared");
    let team = dir.path().join(".auth_qa");
    populate_session(&shared, 0);
    populate_session(&team, 0);
    let store = BackupStore::new(dir.path().join("backups"), 1, memory_logger().0);

    store.create(&shared).await.expect("shared");
    store.create(&team).await.expect("team");

    let entries = store.list().await.expect("list");
    let mut dirs: Vec<_> = entries.iter().map(|e| e.session_dir.as_str()).collect();
    dirs.sort_unstable();
    assert_eq!(dirs, vec![".auth_qa", ".auth_shared"]);
}

#[tokio::test]
async fn prune_ignores_foreign_entries() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join("backups");
    fs::create_dir_all(root.join("notes")).expect("foreign dir");
    for stamp in ["20240101000000", "20240102000000", "20240103000000"] {
        fs::create_dir_all(root.join(format!(".auth_shared-{stamp}"))).expect("backup");
    }
    let store = BackupStore::new(root.clone(), 1, memory_logger().0);

    let removed = store.prune().await.expect("prune");

    assert_eq!(removed.len(), 2);
    assert!(root.join(".auth_shared-20240103000000").exists());
    assert!(root.join("notes").exists());
}

#[tokio::test]
async fn missing_root_lists_nothing() {
    let dir = tempdir().expect("tempdir");
    let store = BackupStore::new(dir.path().join("backups"), 3, memory_logger().0);
    assert!(store.list().await.expect("list").is_empty());
}
