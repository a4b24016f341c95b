//! Lock file acquisition, release and stale-owner handling against a real
//! filesystem.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use session_warden::lock::heartbeat::spawn_heartbeat;
use session_warden::lock::{AcquireOptions, LockFileManager};
use session_warden::models::lock::{LockFileBody, LockRecord, LockState};
use session_warden::AppError;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{age_file, dead_pid, memory_logger, LiveOwner};

fn options(retries: u32) -> AcquireOptions {
    AcquireOptions {
        timeout: Duration::from_secs(60),
        retries,
        retry_delay: Duration::from_millis(10),
    }
}

fn manager() -> LockFileManager {
    LockFileManager::new(memory_logger().0)
}

fn read_body(path: &std::path::Path) -> LockFileBody {
    serde_json::from_str(&fs::read_to_string(path).expect("read lock")).expect("json body")
}

#[tokio::test]
async fn acquire_writes_record_and_release_removes_it() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(".session.lock");
    let locks = manager().with_instance_id("shared");

    let handle = locks.acquire_lock(&path, options(0)).await.expect("acquire");
    assert_eq!(handle.record.owner_pid(), std::process::id());
    assert_eq!(locks.state(&path), LockState::Locked);

    let body = read_body(&path);
    assert_eq!(body.pid, std::process::id());
    assert_eq!(body.instance_id.as_deref(), Some("shared"));
    assert!((Utc::now().timestamp_millis() - body.timestamp).abs() < 5_000);

    assert!(locks.release_lock(&path).await.expect("release"));
    assert!(!path.exists());
    assert_eq!(locks.state(&path), LockState::Unlocked);
}

#[cfg(unix)]
#[tokio::test]
async fn lock_of_dead_owner_is_replaced() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(".session.lock");
    let body = LockFileBody {
        pid: dead_pid(),
        timestamp: Utc::now().timestamp_millis() - 1000,
        instance_id: None,
        platform: None,
        runtime_version: None,
    };
    fs::write(&path, serde_json::to_string(&body).expect("json")).expect("seed");

    let (logger, log) = memory_logger();
    let locks = LockFileManager::new(logger);
    let handle = locks.acquire_lock(&path, options(0)).await.expect("acquire");

    assert_eq!(handle.record.owner_pid(), std::process::id());
    assert_eq!(read_body(&path).pid, std::process::id());
    assert!(log.contains("lock", "removing lock of dead owner"));
}

#[cfg(unix)]
#[tokio::test]
async fn legacy_bare_pid_of_dead_owner_is_replaced_with_structured_record() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(".session.lock");
    fs::write(&path, format!("{}\n", dead_pid())).expect("seed");

    let locks = manager();
    locks.acquire_lock(&path, options(0)).await.expect("acquire");

    assert_eq!(read_body(&path).pid, std::process::id());
}

#[cfg(unix)]
#[tokio::test]
async fn fresh_lock_of_live_owner_is_contended_after_retries() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(".session.lock");
    let owner = LiveOwner::spawn();
    let theirs = manager().with_pid(owner.pid());
    theirs.acquire_lock(&path, options(0)).await.expect("owner acquires");

    let ours = manager();
    let err = ours
        .acquire_lock(&path, options(1))
        .await
        .expect_err("must be contended");

    assert!(matches!(err, AppError::Contention(_)));
    assert!(err.is_retryable());
    assert!(err.to_string().contains("held by live process"));
    assert!(err.to_string().contains("gave up after 2 attempts"));
    assert_eq!(read_body(&path).pid, owner.pid());
    assert_eq!(ours.state(&path), LockState::Unlocked);
}

#[cfg(unix)]
#[tokio::test]
async fn timed_out_lock_of_live_owner_is_removed_then_reacquired_on_retry() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(".session.lock");
    let owner = LiveOwner::spawn();
    let body = LockFileBody {
        pid: owner.pid(),
        timestamp: Utc::now().timestamp_millis() - 120_000,
        instance_id: None,
        platform: None,
        runtime_version: None,
    };
    fs::write(&path, serde_json::to_string(&body).expect("json")).expect("seed");

    let locks = manager();
    let first = locks.acquire_lock(&path, options(0)).await;
    assert!(matches!(first, Err(AppError::Contention(ref msg)) if msg.contains("still alive")));
    assert!(!path.exists());

    locks.acquire_lock(&path, options(0)).await.expect("second attempt");
    assert_eq!(read_body(&path).pid, std::process::id());
}

#[cfg(unix)]
#[tokio::test]
async fn release_by_non_owner_leaves_file_in_place() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(".session.lock");
    let owner = LiveOwner::spawn();
    manager()
        .with_pid(owner.pid())
        .acquire_lock(&path, options(0))
        .await
        .expect("owner acquires");

    let (logger, log) = memory_logger();
    let released = LockFileManager::new(logger).release_lock(&path).await.expect("release");

    assert!(!released);
    assert!(path.exists());
    assert!(log.contains("lock", "not releasing lock owned by another process"));
}

#[tokio::test]
async fn releasing_an_absent_lock_is_a_no_op() {
    let dir = tempdir().expect("tempdir");
    let released = manager()
        .release_lock(&dir.path().join(".session.lock"))
        .await
        .expect("release");
    assert!(!released);
}

#[tokio::test]
async fn reacquiring_an_owned_lock_refreshes_it() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(".session.lock");
    let locks = manager();

    let first = locks.acquire_lock(&path, options(0)).await.expect("first");
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = locks.acquire_lock(&path, options(0)).await.expect("second");

    assert!(second.record.acquired_at() > first.record.acquired_at());
    assert_eq!(read_body(&path).pid, std::process::id());
}

#[tokio::test]
async fn unparseable_lock_file_is_replaced() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(".session.lock");
    fs::write(&path, "{not json").expect("seed");

    let (logger, log) = memory_logger();
    LockFileManager::new(logger)
        .acquire_lock(&path, options(0))
        .await
        .expect("acquire");

    assert_eq!(read_body(&path).pid, std::process::id());
    assert!(log.contains("lock", "removing unparseable lock file"));
}

#[tokio::test]
async fn lock_info_reports_owner_and_staleness() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(".session.lock");
    let locks = manager();

    assert!(locks
        .get_lock_info(&path, Duration::from_secs(60))
        .await
        .expect("info")
        .is_none());

    locks.acquire_lock(&path, options(0)).await.expect("acquire");
    let info = locks
        .get_lock_info(&path, Duration::from_secs(60))
        .await
        .expect("info")
        .expect("present");

    assert!(info.owner_alive);
    assert!(!info.is_stale);
    assert!(info.held_by_current_process);
    assert_eq!(info.record.map(|r| r.owner_pid()), Some(std::process::id()));
}

#[tokio::test]
async fn legacy_lock_age_comes_from_file_mtime() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(".session.lock");
    fs::write(&path, std::process::id().to_string()).expect("seed");
    age_file(&path, Duration::from_secs(600));

    let info = manager()
        .get_lock_info(&path, Duration::from_secs(60))
        .await
        .expect("info")
        .expect("present");

    assert!(info.record.as_ref().is_some_and(LockRecord::is_legacy));
    assert!(info.age_ms >= 599_000);
    assert!(info.is_stale);
}

#[tokio::test]
async fn heartbeat_keeps_the_record_fresh() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(".session.lock");
    let locks = Arc::new(manager());
    locks.acquire_lock(&path, options(0)).await.expect("acquire");
    let before = read_body(&path).timestamp;

    let cancel = CancellationToken::new();
    let lost = CancellationToken::new();
    let task = spawn_heartbeat(
        Arc::clone(&locks),
        path.clone(),
        Duration::from_millis(20),
        cancel.clone(),
        lost.clone(),
    );

    tokio::time::sleep(Duration::from_millis(120)).await;
    cancel.cancel();
    task.await.expect("join");

    assert!(read_body(&path).timestamp > before);
    assert!(!lost.is_cancelled());
}

#[tokio::test]
async fn heartbeat_signals_lost_ownership() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(".session.lock");
    let locks = Arc::new(manager());
    locks.acquire_lock(&path, options(0)).await.expect("acquire");

    let lost = CancellationToken::new();
    let task = spawn_heartbeat(
        Arc::clone(&locks),
        path.clone(),
        Duration::from_millis(20),
        CancellationToken::new(),
        lost.clone(),
    );
    fs::remove_file(&path).expect("steal lock");

    tokio::time::timeout(Duration::from_secs(5), lost.cancelled())
        .await
        .expect("lost signalled");
    task.await.expect("join");
    assert_eq!(locks.state(&path), LockState::Unlocked);
}
