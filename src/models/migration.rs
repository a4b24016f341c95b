//! Consolidation and migration result models.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::identity::IdentityStrategy;

/// What a consolidation pass ended up doing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationAction {
    /// No session directories were found.
    NothingFound,
    /// The only directory already is the target.
    AlreadyConsolidated,
    /// The best candidate now lives at the target path.
    Consolidated,
    /// No candidate was non-empty and structurally valid; nothing was touched.
    NoValidCandidate,
    /// Moving the winner into place failed; the previous layout was restored.
    Failed,
}

/// Outcome of reconciling duplicate session directories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ConsolidationResult {
    /// Action taken.
    pub action: ConsolidationAction,
    /// Every directory matching the naming convention.
    pub source_paths: Vec<PathBuf>,
    /// Highest-scoring candidate, if any.
    pub chosen_source: Option<PathBuf>,
    /// Directory for the current identity.
    pub target_path: PathBuf,
    /// Always `None`; consolidation renames in place.
    pub backup_path: Option<PathBuf>,
    /// Files preserved in the target.
    pub preserved_count: u64,
    /// Directories removed after the rename.
    pub removed_paths: Vec<PathBuf>,
    /// Per-directory failures; other directories still proceed.
    pub errors: Vec<String>,
}

impl ConsolidationResult {
    /// A result that did nothing.
    #[must_use]
    pub fn noop(
        action: ConsolidationAction,
        source_paths: Vec<PathBuf>,
        target_path: PathBuf,
    ) -> Self {
        Self {
            action,
            source_paths,
            chosen_source: None,
            target_path,
            backup_path: None,
            preserved_count: 0,
            removed_paths: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// What a migration ended up doing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MigrationAction {
    /// The target directory already existed.
    AlreadyMigrated,
    /// No usable source directory was found; the client will authenticate fresh.
    NoSource,
    /// A source was copied and the copy validated.
    Migrated,
    /// The copy failed or did not validate; the source is untouched.
    Failed,
}

/// Outcome of relocating session data after the identity changed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct MigrationResult {
    /// Action taken.
    pub action: MigrationAction,
    /// Strategy migrated to.
    pub strategy: IdentityStrategy,
    /// Candidate directories considered.
    pub source_paths: Vec<PathBuf>,
    /// Directory copied from.
    pub chosen_source: Option<PathBuf>,
    /// Directory for the new identity.
    pub target_path: PathBuf,
    /// Snapshot of the source taken before copying.
    pub backup_path: Option<PathBuf>,
    /// Files copied into the target.
    pub preserved_count: u64,
    /// Failures encountered.
    pub errors: Vec<String>,
}

impl MigrationResult {
    /// Whether the target is usable after this migration.
    #[must_use]
    pub fn success(&self) -> bool {
        !matches!(self.action, MigrationAction::Failed)
    }
}
