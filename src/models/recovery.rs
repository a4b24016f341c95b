//! Recovery severity, levels, and outcome.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::validation::ValidationReport;

/// How badly a session directory is damaged.
///
/// Ordered: a higher variant always needs at least as strong a repair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Nothing to repair.
    None,
    /// Only optional paths missing or stale artifacts present.
    Minor,
    /// A required or authentication artifact is missing or empty.
    Major,
    /// The directory is structurally empty or unreadable.
    Critical,
}

/// Repair actions, weakest first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryLevel {
    /// Remove stale lock/log artifacts. Non-destructive.
    PruneArtifacts,
    /// Remove regenerable caches and empty required directories.
    ClearCaches,
    /// Delete everything; the client must authenticate again.
    FullReset,
}

impl RecoveryLevel {
    /// Weakest level sufficient for `severity`; `None` when nothing is needed.
    #[must_use]
    pub fn for_severity(severity: Severity) -> Option<Self> {
        match severity {
            Severity::None => None,
            Severity::Minor => Some(Self::PruneArtifacts),
            Severity::Major => Some(Self::ClearCaches),
            Severity::Critical => Some(Self::FullReset),
        }
    }

    /// Whether this level deletes session data.
    #[must_use]
    pub fn is_destructive(self) -> bool {
        !matches!(self, Self::PruneArtifacts)
    }

    /// Next stronger level, if any.
    #[must_use]
    pub fn escalate(self) -> Option<Self> {
        match self {
            Self::PruneArtifacts => Some(Self::ClearCaches),
            Self::ClearCaches => Some(Self::FullReset),
            Self::FullReset => None,
        }
    }
}

/// Options for one automatic recovery run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RecoveryOptions {
    /// Snapshot the directory before any destructive level.
    pub auto_backup_before_recovery: bool,
    /// Re-validate after each level and escalate while still invalid.
    pub validate_after_recovery: bool,
    /// Hard wall-clock budget in milliseconds.
    pub max_recovery_time_ms: u64,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            auto_backup_before_recovery: true,
            validate_after_recovery: true,
            max_recovery_time_ms: 30_000,
        }
    }
}

/// Outcome of an automatic recovery run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct RecoveryOutcome {
    /// Whether any repair was attempted.
    pub performed: bool,
    /// Assessed severity before repair.
    pub severity: Severity,
    /// Strongest level that was applied.
    pub level_applied: Option<RecoveryLevel>,
    /// Whether a backup was taken.
    pub backup_created: bool,
    /// Backup location, when taken.
    pub backup_path: Option<PathBuf>,
    /// Wall-clock duration of the run.
    pub duration_ms: u64,
    /// Whether the directory is usable afterwards.
    pub success: bool,
    /// Whether the budget ran out mid-escalation.
    pub timed_out: bool,
    /// Whether the client has to authenticate again.
    pub requires_reauth: bool,
    /// Validation after the last level, when requested.
    pub validation_after: Option<ValidationReport>,
    /// Notes about skipped levels or failures.
    pub notes: Vec<String>,
}

impl RecoveryOutcome {
    /// Outcome of a run that found nothing to do.
    #[must_use]
    pub fn not_needed(severity: Severity) -> Self {
        Self {
            performed: false,
            severity,
            level_applied: None,
            backup_created: false,
            backup_path: None,
            duration_ms: 0,
            success: true,
            timed_out: false,
            requires_reauth: false,
            validation_after: None,
            notes: Vec::new(),
        }
    }
}
