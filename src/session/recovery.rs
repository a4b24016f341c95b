//! Escalating, time-bounded repair of corrupted session directories.
//!
//! Levels run weakest first: prune stale artifacts, clear caches, full
//! reset. Destructive levels need a successful backup when backups are
//! enabled; without one only pruning runs. The whole run shares one
//! wall-clock budget and stops with a partial outcome when it runs out.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audit::{emit, AuditEntry, AuditLevel, SharedLogger};
use crate::fs_ops::{dir_has_entries, remove_dir_if_exists, remove_file_if_exists};
use crate::models::recovery::{RecoveryLevel, RecoveryOptions, RecoveryOutcome, Severity};
use crate::models::validation::{ValidationIssue, ValidationReport};
use crate::Result;

use super::backup::BackupStore;
use super::validator::SessionValidator;

/// Map a validation report to a repair severity.
#[must_use]
pub fn assess_severity(report: &ValidationReport) -> Severity {
    if report.issues.iter().any(|issue| {
        matches!(
            issue,
            ValidationIssue::DirectoryMissing
                | ValidationIssue::DirectoryEmpty
                | ValidationIssue::Unreadable(_)
        )
    }) {
        return Severity::Critical;
    }
    if !report.required_missing.is_empty()
        || report.issues.iter().any(|issue| {
            matches!(
                issue,
                ValidationIssue::MissingRequired(_) | ValidationIssue::EmptyRequired(_)
            )
        })
    {
        return Severity::Major;
    }
    if !report.issues.is_empty() || !report.warnings.is_empty() {
        return Severity::Minor;
    }
    Severity::None
}

enum BackupState {
    NotTaken,
    Taken,
    Failed,
}

/// Repairs session directories.
pub struct RecoveryManager {
    validator: Arc<SessionValidator>,
    backups: Arc<BackupStore>,
    logger: SharedLogger,
}

impl RecoveryManager {
    /// Construct a recovery manager.
    #[must_use]
    pub fn new(
        validator: Arc<SessionValidator>,
        backups: Arc<BackupStore>,
        logger: SharedLogger,
    ) -> Self {
        Self {
            validator,
            backups,
            logger,
        }
    }

    /// Validate `path` and repair it if needed.
    pub async fn recover(&self, path: &Path, options: RecoveryOptions) -> RecoveryOutcome {
        let report = self.validator.validate(path).await;
        self.perform_automatic_recovery(path, &report, options).await
    }

    /// Repair `path` according to an existing validation `report`.
    ///
    /// A directory that does not exist is never repaired.
    pub async fn perform_automatic_recovery(
        &self,
        path: &Path,
        report: &ValidationReport,
        options: RecoveryOptions,
    ) -> RecoveryOutcome {
        let started = Instant::now();
        let budget = Duration::from_millis(options.max_recovery_time_ms);
        let severity = assess_severity(report);

        let mut outcome = RecoveryOutcome::not_needed(severity);
        if !report.exists {
            outcome.notes.push("session directory does not exist".into());
            return outcome;
        }
        let Some(mut level) = RecoveryLevel::for_severity(severity) else {
            return outcome;
        };
        outcome.success = false;

        self.log(
            AuditEntry::new(AuditLevel::Warn, "recovery", "recovery started")
                .with_field("path", path.display().to_string())
                .with_field("severity", format!("{severity:?}"))
                .with_field("issues", report.issues.len()),
        );

        let mut backup = BackupState::NotTaken;
        loop {
            let Some(remaining) = budget.checked_sub(started.elapsed()).filter(|r| !r.is_zero())
            else {
                outcome.timed_out = true;
                break;
            };

            if level.is_destructive() && options.auto_backup_before_recovery {
                if matches!(backup, BackupState::NotTaken) {
                    backup = match self.backups.create(path).await {
                        Ok(backup_path) => {
                            outcome.backup_created = true;
                            outcome.backup_path = Some(backup_path);
                            BackupState::Taken
                        }
                        Err(err) => {
                            outcome.notes.push(format!("backup failed: {err}"));
                            BackupState::Failed
                        }
                    };
                }
                if matches!(backup, BackupState::Failed) {
                    outcome
                        .notes
                        .push(format!("skipped {level:?}: destructive level needs a backup"));
                    if outcome.level_applied.is_none() {
                        // Pruning is still allowed.
                        level = RecoveryLevel::PruneArtifacts;
                        continue;
                    }
                    break;
                }
            }

            outcome.performed = true;
            match tokio::time::timeout(remaining, self.apply(level, path)).await {
                Err(_) => {
                    outcome.timed_out = true;
                    outcome.notes.push(format!("{level:?} exceeded the time budget"));
                    break;
                }
                Ok(Err(err)) => {
                    outcome.notes.push(format!("{level:?} failed: {err}"));
                    break;
                }
                Ok(Ok(())) => {
                    outcome.level_applied = Some(level);
                    self.log(
                        AuditEntry::new(AuditLevel::Info, "recovery", "recovery level applied")
                            .with_field("path", path.display().to_string())
                            .with_field("level", format!("{level:?}")),
                    );
                }
            }

            if level == RecoveryLevel::FullReset {
                outcome.requires_reauth = true;
                outcome.success = true;
                if options.validate_after_recovery {
                    outcome.validation_after = Some(self.validator.validate(path).await);
                }
                break;
            }

            if !options.validate_after_recovery {
                outcome.success = !matches!(backup, BackupState::Failed);
                break;
            }

            let remaining = budget.saturating_sub(started.elapsed());
            let Ok(after) = tokio::time::timeout(remaining, self.validator.validate(path)).await
            else {
                outcome.timed_out = true;
                break;
            };
            let valid = after.is_valid;
            outcome.validation_after = Some(after);
            if valid {
                outcome.success = true;
                break;
            }

            match level.escalate() {
                Some(next) => level = next,
                None => break,
            }
        }

        if !outcome.success && !outcome.timed_out && outcome.notes.is_empty() {
            outcome.notes.push("session still invalid after recovery".into());
        }
        outcome.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        self.log(
            AuditEntry::new(
                if outcome.success { AuditLevel::Info } else { AuditLevel::Warn },
                "recovery",
                "recovery finished",
            )
            .with_field("path", path.display().to_string())
            .with_field("success", outcome.success)
            .with_field("timed_out", outcome.timed_out)
            .with_field("requires_reauth", outcome.requires_reauth)
            .with_field("duration_ms", outcome.duration_ms),
        );
        outcome
    }

    /// Delete the directory at `path` so the client authenticates from scratch.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if removal fails.
    pub async fn full_reset(&self, path: &Path) -> Result<()> {
        remove_dir_if_exists(path).await?;
        self.log(
            AuditEntry::new(AuditLevel::Warn, "recovery", "session reset")
                .with_field("path", path.display().to_string()),
        );
        Ok(())
    }

    async fn apply(&self, level: RecoveryLevel, path: &Path) -> Result<()> {
        match level {
            RecoveryLevel::PruneArtifacts => self.prune_artifacts(path).await,
            RecoveryLevel::ClearCaches => {
                self.prune_artifacts(path).await?;
                self.clear_caches(path).await
            }
            RecoveryLevel::FullReset => self.full_reset(path).await,
        }
    }

    async fn prune_artifacts(&self, path: &Path) -> Result<()> {
        for artifact in self.validator.stale_artifacts(path).await? {
            remove_file_if_exists(&artifact).await?;
        }
        Ok(())
    }

    async fn clear_caches(&self, path: &Path) -> Result<()> {
        let config = self.validator.config();
        for cache in &config.cache_paths {
            remove_dir_if_exists(&path.join(cache)).await?;
        }
        for required in &config.required_paths {
            let full = path.join(required);
            if tokio::fs::metadata(&full).await.is_ok_and(|m| m.is_dir())
                && !dir_has_entries(&full).await
            {
                remove_dir_if_exists(&full).await?;
            }
        }
        Ok(())
    }

    fn log(&self, entry: AuditEntry) {
        emit(self.logger.as_ref(), entry);
    }
}
