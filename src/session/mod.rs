//! Session directory lifecycle: naming, validation, consolidation,
//! migration, recovery and backups.
//!
//! [`SessionStore`] wires the components for one base directory from the
//! global configuration. Only the lock holder may call the mutating
//! operations.

pub mod backup;
pub mod consolidator;
pub mod migrator;
pub mod naming;
pub mod policy_state;
pub mod recovery;
pub mod scoring;
pub mod validator;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::audit::SharedLogger;
use crate::config::GlobalConfig;
use crate::fs_ops::dir_stats;
use crate::models::session::SessionDirectory;
use crate::Result;

use self::backup::BackupStore;
use self::consolidator::SessionConsolidator;
use self::migrator::SessionMigrator;
use self::naming::{file_name_of, SessionNaming};
use self::policy_state::PolicyStore;
use self::recovery::RecoveryManager;
use self::validator::SessionValidator;

/// Session components for one base directory.
pub struct SessionStore {
    base_dir: PathBuf,
    naming: SessionNaming,
    validator: Arc<SessionValidator>,
    backups: Arc<BackupStore>,
    consolidator: SessionConsolidator,
    migrator: SessionMigrator,
    recovery: RecoveryManager,
    policy: PolicyStore,
}

impl SessionStore {
    /// Build every component from `config`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the session prefix is unusable.
    pub fn from_config(config: &GlobalConfig, logger: &SharedLogger) -> Result<Self> {
        let naming = SessionNaming::new(&config.session_prefix)?;
        let validator = Arc::new(SessionValidator::new(
            config.validation.clone(),
            Arc::clone(logger),
        ));
        let backups = Arc::new(BackupStore::new(
            config.backups_path(),
            config.recovery.keep_backups,
            Arc::clone(logger),
        ));
        Ok(Self {
            base_dir: config.base_dir.clone(),
            consolidator: SessionConsolidator::new(
                naming.clone(),
                Arc::clone(&validator),
                Arc::clone(logger),
            ),
            migrator: SessionMigrator::new(
                naming.clone(),
                Arc::clone(&validator),
                Arc::clone(&backups),
                Arc::clone(logger),
            ),
            recovery: RecoveryManager::new(
                Arc::clone(&validator),
                Arc::clone(&backups),
                Arc::clone(logger),
            ),
            policy: PolicyStore::new(config.policy_path(), Arc::clone(logger)),
            naming,
            validator,
            backups,
        })
    }

    /// Base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Naming convention.
    #[must_use]
    pub fn naming(&self) -> &SessionNaming {
        &self.naming
    }

    /// Session path for `instance_id`.
    #[must_use]
    pub fn session_path(&self, instance_id: &str) -> PathBuf {
        self.naming.session_path(&self.base_dir, instance_id)
    }

    /// Validator.
    #[must_use]
    pub fn validator(&self) -> &SessionValidator {
        &self.validator
    }

    /// Backup store.
    #[must_use]
    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    /// Consolidator.
    #[must_use]
    pub fn consolidator(&self) -> &SessionConsolidator {
        &self.consolidator
    }

    /// Migrator.
    #[must_use]
    pub fn migrator(&self) -> &SessionMigrator {
        &self.migrator
    }

    /// Recovery manager.
    #[must_use]
    pub fn recovery(&self) -> &RecoveryManager {
        &self.recovery
    }

    /// Policy state file.
    #[must_use]
    pub fn policy(&self) -> &PolicyStore {
        &self.policy
    }

    /// Inventory of every session directory under the base directory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the base directory cannot be listed.
    pub async fn list_sessions(&self) -> Result<Vec<SessionDirectory>> {
        let mut sessions = Vec::new();
        for path in self.naming.discover(&self.base_dir).await? {
            let stats = dir_stats(&path).await.unwrap_or_default();
            let instance_id = self
                .naming
                .instance_id_of(file_name_of(&path))
                .unwrap_or_default()
                .to_owned();
            sessions.push(SessionDirectory {
                structurally_valid: self.validator.quick_validate(&path).await,
                has_auth_data: self.validator.has_auth_data(&path).await,
                instance_id,
                size_bytes: stats.size_bytes,
                file_count: stats.file_count,
                last_modified_at: stats.last_modified,
                path,
            });
        }
        Ok(sessions)
    }
}
