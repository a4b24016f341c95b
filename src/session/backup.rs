//! Snapshot backups of session directories with count-based retention.
//!
//! Backups live under one root as `<session dir>-<UTC yyyymmddHHMMSS>`,
//! with a `-N` suffix when two snapshots land in the same second.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{NaiveDateTime, Utc};
use regex::Regex;

use crate::audit::{emit, AuditEntry, AuditLevel, SharedLogger};
use crate::fs_ops::{copy_dir_recursive, exists, remove_dir_if_exists};
use crate::models::session::BackupEntry;
use crate::{AppError, Result};

use super::naming::file_name_of;

const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

fn backup_name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(?P<dir>.+)-(?P<stamp>\d{14})(?:-(?P<seq>\d+))?$").ok())
        .as_ref()
}

/// Parse a backup directory name into `(session dir, created_at, sequence)`.
#[must_use]
pub fn parse_backup_name(name: &str) -> Option<(String, NaiveDateTime, u32)> {
    let caps = backup_name_pattern()?.captures(name)?;
    let created = NaiveDateTime::parse_from_str(&caps["stamp"], STAMP_FORMAT).ok()?;
    let seq = caps
        .name("seq")
        .map_or(Some(0), |m| m.as_str().parse().ok())?;
    Some((caps["dir"].to_owned(), created, seq))
}

/// Creates, lists and prunes backups under one root directory.
pub struct BackupStore {
    root: PathBuf,
    keep: usize,
    logger: SharedLogger,
}

impl BackupStore {
    /// Store rooted at `root` retaining `keep` backups per session directory.
    #[must_use]
    pub fn new(root: PathBuf, keep: usize, logger: SharedLogger) -> Self {
        Self { root, keep, logger }
    }

    /// Backup root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy `source` into a new backup, then prune older ones.
    ///
    /// Pruning failures are logged and do not fail the backup.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the root cannot be created or the copy fails.
    /// A partial copy is removed.
    pub async fn create(&self, source: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|err| {
            AppError::Io(format!(
                "failed to create backup root {}: {err}",
                self.root.display()
            ))
        })?;

        let dir_name = file_name_of(source);
        if dir_name.is_empty() {
            return Err(AppError::Io(format!(
                "cannot back up {}: no directory name",
                source.display()
            )));
        }
        let stamp = Utc::now().format(STAMP_FORMAT).to_string();
        let mut target = self.root.join(format!("{dir_name}-{stamp}"));
        let mut seq = 0_u32;
        while exists(&target).await {
            seq += 1;
            target = self.root.join(format!("{dir_name}-{stamp}-{seq}"));
        }

        let copied = match copy_dir_recursive(source, &target).await {
            Ok(copied) => copied,
            Err(err) => {
                let _ = remove_dir_if_exists(&target).await;
                return Err(err);
            }
        };

        emit(
            self.logger.as_ref(),
            AuditEntry::new(AuditLevel::Info, "backup", "backup created")
                .with_field("source", source.display().to_string())
                .with_field("backup", target.display().to_string())
                .with_field("files", copied),
        );

        if let Err(err) = self.prune_for(dir_name).await {
            emit(
                self.logger.as_ref(),
                AuditEntry::new(AuditLevel::Warn, "backup", "backup pruning failed")
                    .with_field("error", err.to_string()),
            );
        }

        Ok(target)
    }

    /// Every backup under the root, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the root exists but cannot be listed.
    pub async fn list(&self) -> Result<Vec<BackupEntry>> {
        let mut reader = match tokio::fs::read_dir(&self.root).await {
            Ok(reader) => reader,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(AppError::Io(format!(
                    "failed to list backups in {}: {err}",
                    self.root.display()
                )))
            }
        };

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|err| {
            AppError::Io(format!(
                "failed to list backups in {}: {err}",
                self.root.display()
            ))
        })? {
            let path = entry.path();
            let Some((session_dir, created, sequence)) = parse_backup_name(file_name_of(&path))
            else {
                continue;
            };
            entries.push(BackupEntry {
                path,
                session_dir,
                created_at: created.and_utc(),
                sequence,
            });
        }

        entries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.sequence.cmp(&a.sequence))
        });
        Ok(entries)
    }

    /// Remove all but the newest `keep` backups of every session directory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the backups cannot be listed or removed.
    pub async fn prune(&self) -> Result<Vec<PathBuf>> {
        let entries = self.list().await?;
        let mut names: Vec<&str> = entries.iter().map(|e| e.session_dir.as_str()).collect();
        names.sort_unstable();
        names.dedup();

        let mut removed = Vec::new();
        for name in names {
            removed.extend(self.prune_entries(&entries, name).await?);
        }
        Ok(removed)
    }

    async fn prune_for(&self, session_dir: &str) -> Result<Vec<PathBuf>> {
        let entries = self.list().await?;
        self.prune_entries(&entries, session_dir).await
    }

    async fn prune_entries(&self, entries: &[BackupEntry], session_dir: &str) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for entry in entries
            .iter()
            .filter(|e| e.session_dir == session_dir)
            .skip(self.keep)
        {
            remove_dir_if_exists(&entry.path).await?;
            emit(
                self.logger.as_ref(),
                AuditEntry::new(AuditLevel::Debug, "backup", "old backup removed")
                    .with_field("backup", entry.path.display().to_string()),
            );
            removed.push(entry.path.clone());
        }
        Ok(removed)
    }
}
