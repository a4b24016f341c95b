//! Relocates session data after the resolved identity changed.
//!
//! Migration copies; it never moves or deletes the source. A copy that
//! fails validation is removed again and the source stays as it was.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use crate::audit::{emit, AuditEntry, AuditLevel, SharedLogger};
use crate::fs_ops::{copy_dir_recursive, exists, remove_dir_if_exists};
use crate::models::identity::InstanceIdentity;
use crate::models::migration::{MigrationAction, MigrationResult};

use super::backup::BackupStore;
use super::naming::SessionNaming;
use super::scoring::{collect_candidates, rank};
use super::validator::SessionValidator;

/// Options for one migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrateOptions {
    /// Snapshot the chosen source before copying.
    pub backup: bool,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self { backup: true }
    }
}

/// Copies the best existing session into a new identity's directory.
pub struct SessionMigrator {
    naming: SessionNaming,
    validator: Arc<SessionValidator>,
    backups: Arc<BackupStore>,
    logger: SharedLogger,
}

impl SessionMigrator {
    /// Construct a migrator.
    #[must_use]
    pub fn new(
        naming: SessionNaming,
        validator: Arc<SessionValidator>,
        backups: Arc<BackupStore>,
        logger: SharedLogger,
    ) -> Self {
        Self {
            naming,
            validator,
            backups,
            logger,
        }
    }

    /// Populate the directory of `identity` under `base_dir` from the best
    /// existing session.
    pub async fn migrate(
        &self,
        base_dir: &Path,
        identity: &InstanceIdentity,
        options: MigrateOptions,
    ) -> MigrationResult {
        let target = self.naming.session_path(base_dir, &identity.id);
        let mut result = MigrationResult {
            action: MigrationAction::NoSource,
            strategy: identity.strategy,
            source_paths: Vec::new(),
            chosen_source: None,
            target_path: target.clone(),
            backup_path: None,
            preserved_count: 0,
            errors: Vec::new(),
        };

        if exists(&target).await {
            result.action = MigrationAction::AlreadyMigrated;
            return result;
        }

        match self.naming.discover(base_dir).await {
            Ok(found) => result.source_paths = found,
            Err(err) => {
                result.errors.push(err.to_string());
                return result;
            }
        }

        let candidates =
            collect_candidates(&self.validator, &result.source_paths, &mut result.errors).await;
        let target_name = self.naming.dir_name(&identity.id);
        let Some((_, source)) = rank(candidates, &target_name, Utc::now()).into_iter().next()
        else {
            self.log(
                AuditEntry::new(AuditLevel::Info, "migrator", "no session to migrate from")
                    .with_field("target", target.display().to_string()),
            );
            return result;
        };
        result.chosen_source = Some(source.path.clone());

        if options.backup {
            match self.backups.create(&source.path).await {
                Ok(path) => result.backup_path = Some(path),
                Err(err) => {
                    result.action = MigrationAction::Failed;
                    result.errors.push(format!("backup failed: {err}"));
                    self.log_failure(&result);
                    return result;
                }
            }
        }

        match copy_dir_recursive(&source.path, &target).await {
            Ok(copied) => result.preserved_count = copied,
            Err(err) => {
                result.errors.push(err.to_string());
                self.discard_target(&target, &mut result).await;
                return result;
            }
        }

        let report = self.validator.validate(&target).await;
        if !report.is_valid {
            result
                .errors
                .extend(report.issues.iter().map(|issue| format!("target invalid: {issue}")));
            self.discard_target(&target, &mut result).await;
            return result;
        }

        result.action = MigrationAction::Migrated;
        self.log(
            AuditEntry::new(AuditLevel::Info, "migrator", "session migrated")
                .with_field("from", source.path.display().to_string())
                .with_field("to", target.display().to_string())
                .with_field("files", result.preserved_count)
                .with_field("strategy", identity.strategy.to_string()),
        );
        result
    }

    async fn discard_target(&self, target: &Path, result: &mut MigrationResult) {
        result.action = MigrationAction::Failed;
        result.preserved_count = 0;
        if let Err(err) = remove_dir_if_exists(target).await {
            result.errors.push(err.to_string());
        }
        self.log_failure(result);
    }

    fn log_failure(&self, result: &MigrationResult) {
        self.log(
            AuditEntry::new(AuditLevel::Warn, "migrator", "migration failed, source kept")
                .with_field(
                    "source",
                    result
                        .chosen_source
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                )
                .with_field("errors", result.errors.clone()),
        );
    }

    fn log(&self, entry: AuditEntry) {
        emit(self.logger.as_ref(), entry);
    }
}
