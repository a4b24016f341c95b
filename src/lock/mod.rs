//! Cross-process mutual exclusion over a single lock file.
//!
//! The lock file holds a [`LockRecord`] naming the owning PID. Acquisition
//! reads the file, probes the recorded owner with a null signal, and
//! removes records whose owner is dead or whose age exceeds the staleness
//! timeout. Fresh records are written to a temporary file and published
//! with a no-clobber persist, so two processes racing on an absent lock
//! cannot both win. A racer that observes a freshly-dead owner at the same
//! instant as another process may still interleave; there is no fencing
//! token.
//!
//! Operations on one path are sequential within a process.

pub mod heartbeat;
pub mod process;

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::audit::{emit, AuditEntry, AuditLevel, SharedLogger};
use crate::config::LockConfig;
use crate::fs_ops::{remove_file_if_exists, write_atomic_async};
use crate::models::lock::{LockHandle, LockInfo, LockRecord, LockState};
use crate::{AppError, Result};

use self::process::pid_is_alive;

/// Stale-removal passes allowed within a single attempt.
const MAX_PASSES_PER_ATTEMPT: usize = 4;

/// Timing for one `acquire_lock` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireOptions {
    /// Age after which a live owner's record is treated as stale.
    pub timeout: Duration,
    /// Extra attempts after the first contention.
    pub retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
}

impl From<&LockConfig> for AcquireOptions {
    fn from(config: &LockConfig) -> Self {
        Self {
            timeout: config.stale_after(),
            retries: config.retries,
            retry_delay: config.retry_delay(),
        }
    }
}

/// Content of a lock file as read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LockFileContent {
    Parsed(LockRecord),
    Unparseable(String),
}

/// Acquires, refreshes and releases lock files on behalf of one process.
pub struct LockFileManager {
    pid: u32,
    instance_id: Option<String>,
    logger: SharedLogger,
    states: Mutex<HashMap<PathBuf, LockState>>,
}

impl LockFileManager {
    /// Manager acting for the current process.
    #[must_use]
    pub fn new(logger: SharedLogger) -> Self {
        Self {
            pid: std::process::id(),
            instance_id: None,
            logger,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Act as `pid` instead of the current process.
    #[must_use]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Record `instance_id` in written lock records.
    #[must_use]
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// PID this manager acts for.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// In-process state of `path`.
    #[must_use]
    pub fn state(&self, path: &Path) -> LockState {
        self.states
            .lock()
            .ok()
            .and_then(|guard| guard.get(path).copied())
            .unwrap_or(LockState::Unlocked)
    }

    fn set_state(&self, path: &Path, state: LockState) {
        if let Ok(mut guard) = self.states.lock() {
            if state == LockState::Unlocked {
                guard.remove(path);
            } else {
                guard.insert(path.to_path_buf(), state);
            }
        }
    }

    /// Acquire the lock at `path`, retrying on contention.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Contention` when a live owner still holds the lock
    /// after `retries` extra attempts, or `AppError::Io` when the lock file
    /// cannot be read or written.
    pub async fn acquire_lock(&self, path: &Path, options: AcquireOptions) -> Result<LockHandle> {
        self.set_state(path, LockState::Acquiring);
        let mut attempt: u32 = 0;

        loop {
            match self.try_acquire_once(path, options.timeout).await {
                Ok(handle) => {
                    self.set_state(path, LockState::Locked);
                    self.log(
                        AuditEntry::new(AuditLevel::Info, "lock", "lock acquired")
                            .with_field("path", path.display().to_string())
                            .with_field("pid", self.pid)
                            .with_field("attempts", attempt + 1),
                    );
                    return Ok(handle);
                }
                Err(err) if err.is_retryable() && attempt < options.retries => {
                    attempt += 1;
                    self.log(
                        AuditEntry::new(AuditLevel::Debug, "lock", "lock contended, retrying")
                            .with_field("path", path.display().to_string())
                            .with_field("attempt", attempt)
                            .with_field("error", err.to_string()),
                    );
                    tokio::time::sleep(options.retry_delay).await;
                }
                Err(err) => {
                    self.set_state(path, LockState::Unlocked);
                    let err = match err {
                        AppError::Contention(msg) => AppError::Contention(format!(
                            "{msg} (gave up after {} attempts)",
                            attempt + 1
                        )),
                        other => other,
                    };
                    self.log(
                        AuditEntry::new(AuditLevel::Warn, "lock", "lock acquisition failed")
                            .with_field("path", path.display().to_string())
                            .with_field("error", err.to_string()),
                    );
                    return Err(err);
                }
            }
        }
    }

    async fn try_acquire_once(&self, path: &Path, timeout: Duration) -> Result<LockHandle> {
        for _ in 0..MAX_PASSES_PER_ATTEMPT {
            let record = match read_lock_file(path).await? {
                None => match self.write_fresh(path).await? {
                    Some(handle) => return Ok(handle),
                    // Someone else published first; look at their record.
                    None => continue,
                },
                Some(LockFileContent::Unparseable(raw)) => {
                    self.log(
                        AuditEntry::new(AuditLevel::Warn, "lock", "removing unparseable lock file")
                            .with_field("path", path.display().to_string())
                            .with_field("content", raw.chars().take(64).collect::<String>()),
                    );
                    remove_file_if_exists(path).await?;
                    continue;
                }
                Some(LockFileContent::Parsed(record)) => record,
            };

            let owner = record.owner_pid();
            if owner == self.pid {
                let refreshed = record.refreshed();
                write_replace(path, &refreshed).await?;
                return Ok(LockHandle {
                    path: path.to_path_buf(),
                    record: refreshed,
                });
            }

            if !pid_is_alive(owner) {
                self.log(
                    AuditEntry::new(AuditLevel::Info, "lock", "removing lock of dead owner")
                        .with_field("path", path.display().to_string())
                        .with_field("owner_pid", owner)
                        .with_field("legacy", record.is_legacy()),
                );
                remove_if_unchanged(path, &record).await?;
                continue;
            }

            let age = age_of(record.acquired_at());
            if age > timeout {
                self.log(
                    AuditEntry::new(AuditLevel::Warn, "lock", "removing timed-out lock")
                        .with_field("path", path.display().to_string())
                        .with_field("owner_pid", owner)
                        .with_field("age_ms", duration_ms(age)),
                );
                remove_if_unchanged(path, &record).await?;
                if pid_is_alive(owner) {
                    return Err(AppError::Contention(format!(
                        "owner {owner} of {} is still alive after stale removal",
                        path.display()
                    )));
                }
                continue;
            }

            return Err(AppError::Contention(format!(
                "{} held by live process {owner} for {}ms",
                path.display(),
                duration_ms(age)
            )));
        }

        Err(AppError::Contention(format!(
            "{} kept changing during acquisition",
            path.display()
        )))
    }

    async fn write_fresh(&self, path: &Path) -> Result<Option<LockHandle>> {
        let record = LockRecord::for_process(self.pid, self.instance_id.clone());
        let published = write_atomic_async(path, record.to_file_contents()?, false).await?;

        Ok(published.then(|| LockHandle {
            path: path.to_path_buf(),
            record,
        }))
    }

    /// Release the lock at `path` if this process owns it.
    ///
    /// Returns `false` without touching the file when it is absent,
    /// unparseable, or owned by another PID.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be read or removed.
    pub async fn release_lock(&self, path: &Path) -> Result<bool> {
        self.set_state(path, LockState::Releasing);
        let outcome = self.release_inner(path).await;
        self.set_state(path, LockState::Unlocked);
        outcome
    }

    async fn release_inner(&self, path: &Path) -> Result<bool> {
        let Some(content) = read_lock_file(path).await? else {
            return Ok(false);
        };
        let LockFileContent::Parsed(record) = content else {
            return Ok(false);
        };

        if record.owner_pid() != self.pid {
            self.log(
                AuditEntry::new(AuditLevel::Warn, "lock", "not releasing lock owned by another process")
                    .with_field("path", path.display().to_string())
                    .with_field("owner_pid", record.owner_pid())
                    .with_field("pid", self.pid),
            );
            return Ok(false);
        }

        remove_file_if_exists(path).await?;
        self.log(
            AuditEntry::new(AuditLevel::Info, "lock", "lock released")
                .with_field("path", path.display().to_string())
                .with_field("pid", self.pid),
        );
        Ok(true)
    }

    /// Rewrite the acquisition time of a lock this process owns.
    ///
    /// Returns `false` when the lock is missing or owned by someone else,
    /// meaning ownership was lost.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be read or written.
    pub async fn refresh_lock(&self, path: &Path) -> Result<bool> {
        match read_lock_file(path).await? {
            Some(LockFileContent::Parsed(record)) if record.owner_pid() == self.pid => {
                write_replace(path, &record.refreshed()).await?;
                Ok(true)
            }
            _ => {
                self.set_state(path, LockState::Unlocked);
                Ok(false)
            }
        }
    }

    /// Read-only view of the lock at `path`; `None` when no file exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file exists but cannot be read.
    pub async fn get_lock_info(&self, path: &Path, stale_after: Duration) -> Result<Option<LockInfo>> {
        let Some(content) = read_lock_file(path).await? else {
            return Ok(None);
        };

        let info = match content {
            LockFileContent::Parsed(record) => {
                let alive = pid_is_alive(record.owner_pid());
                let age = age_of(record.acquired_at());
                LockInfo {
                    path: path.to_path_buf(),
                    owner_alive: alive,
                    is_stale: !alive || age > stale_after,
                    age_ms: i64::try_from(duration_ms(age)).unwrap_or(i64::MAX),
                    held_by_current_process: record.owner_pid() == self.pid,
                    record: Some(record),
                }
            }
            LockFileContent::Unparseable(_) => LockInfo {
                path: path.to_path_buf(),
                record: None,
                owner_alive: false,
                is_stale: true,
                age_ms: 0,
                held_by_current_process: false,
            },
        };
        Ok(Some(info))
    }

    fn log(&self, entry: AuditEntry) {
        emit(self.logger.as_ref(), entry);
    }
}

/// Time since `acquired_at`; zero for timestamps in the future.
fn age_of(acquired_at: DateTime<Utc>) -> Duration {
    (Utc::now() - acquired_at).to_std().unwrap_or(Duration::ZERO)
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

async fn read_lock_file(path: &Path) -> Result<Option<LockFileContent>> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(AppError::Io(format!(
                "failed to read lock file {}: {err}",
                path.display()
            )))
        }
    };

    let modified_at = tokio::fs::metadata(path)
        .await
        .ok()
        .and_then(|meta| meta.modified().ok())
        .map_or_else(Utc::now, DateTime::<Utc>::from);

    Ok(Some(match LockRecord::parse(&raw, modified_at) {
        Some(record) => LockFileContent::Parsed(record),
        None => LockFileContent::Unparseable(raw),
    }))
}

/// Remove `path` only if it still holds `expected`.
async fn remove_if_unchanged(path: &Path, expected: &LockRecord) -> Result<()> {
    match read_lock_file(path).await? {
        Some(LockFileContent::Parsed(current)) if current == *expected => remove_file_if_exists(path).await,
        _ => Ok(()),
    }
}

async fn write_replace(path: &Path, record: &LockRecord) -> Result<()> {
    write_atomic_async(path, record.to_file_contents()?, true).await?;
    Ok(())
}
