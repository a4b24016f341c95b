//! Persisted record of the identity a base directory was last used with.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::audit::{emit, AuditEntry, AuditLevel, SharedLogger};
use crate::fs_ops::write_atomic_async;
use crate::models::session::PolicyState;
use crate::{AppError, Result};

/// Reads and atomically rewrites the policy state file.
pub struct PolicyStore {
    path: PathBuf,
    logger: SharedLogger,
}

impl PolicyStore {
    /// Store backed by the file at `path`.
    #[must_use]
    pub fn new(path: PathBuf, logger: SharedLogger) -> Self {
        Self { path, logger }
    }

    /// File location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last recorded state; `None` when absent or unreadable as JSON.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file exists but cannot be read.
    pub async fn load(&self) -> Result<Option<PolicyState>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(AppError::Io(format!(
                    "failed to read policy state {}: {err}",
                    self.path.display()
                )))
            }
        };

        match serde_json::from_str(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(err) => {
                emit(
                    self.logger.as_ref(),
                    AuditEntry::new(AuditLevel::Warn, "policy", "ignoring unreadable policy state")
                        .with_field("path", self.path.display().to_string())
                        .with_field("error", err.to_string()),
                );
                Ok(None)
            }
        }
    }

    /// Replace the recorded state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be written.
    pub async fn save(&self, state: &PolicyState) -> Result<()> {
        let contents = serde_json::to_string_pretty(state)?;
        write_atomic_async(&self.path, contents, true).await?;
        emit(
            self.logger.as_ref(),
            AuditEntry::new(AuditLevel::Debug, "policy", "policy state saved")
                .with_field("strategy", state.strategy.to_string())
                .with_field("instance_id", state.instance_id.as_str()),
        );
        Ok(())
    }
}
