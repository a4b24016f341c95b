//! Structural inspection of session directories.
//!
//! [`SessionValidator::validate`] is the deep variant: required and
//! optional sub-paths, stale browser artifacts, and a recursive size scan.
//! [`SessionValidator::quick_validate`] only checks that the first two
//! required paths exist, for hot paths right after a connection.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use glob::Pattern;

use crate::audit::{emit, AuditEntry, AuditLevel, SharedLogger};
use crate::config::ValidationConfig;
use crate::fs_ops::{dir_has_entries, dir_stats, walk};
use crate::models::validation::{ValidationIssue, ValidationReport, ValidationWarning};

/// Number of required paths covered by the quick check.
const QUICK_CHECK_DEPTH: usize = 2;

/// Validates session directories against a configured layout.
pub struct SessionValidator {
    config: ValidationConfig,
    artifacts: Vec<Pattern>,
    logger: SharedLogger,
}

impl SessionValidator {
    /// Construct a validator. Artifact patterns that fail to compile are
    /// logged and skipped.
    #[must_use]
    pub fn new(config: ValidationConfig, logger: SharedLogger) -> Self {
        let artifacts = config
            .stale_artifacts
            .iter()
            .filter_map(|raw| match Pattern::new(raw) {
                Ok(pattern) => Some(pattern),
                Err(err) => {
                    emit(
                        logger.as_ref(),
                        AuditEntry::new(AuditLevel::Warn, "validator", "skipping invalid pattern")
                            .with_field("pattern", raw.as_str())
                            .with_field("error", err.to_string()),
                    );
                    None
                }
            })
            .collect();
        Self {
            config,
            artifacts,
            logger,
        }
    }

    /// Layout this validator checks against.
    #[must_use]
    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Deep validation of the directory at `path`.
    pub async fn validate(&self, path: &Path) -> ValidationReport {
        let mut report = ValidationReport {
            path: path.to_path_buf(),
            ..ValidationReport::default()
        };

        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => report.exists = true,
            Ok(_) => {
                report.exists = true;
                report
                    .issues
                    .push(ValidationIssue::Unreadable("not a directory".into()));
                return self.finish(report);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                report.issues.push(ValidationIssue::DirectoryMissing);
                report.required_missing = self.config.required_paths.clone();
                return self.finish(report);
            }
            Err(err) => {
                report.exists = true;
                report.issues.push(ValidationIssue::Unreadable(err.to_string()));
                return self.finish(report);
            }
        }

        if !dir_has_entries(path).await {
            report.issues.push(ValidationIssue::DirectoryEmpty);
        }

        for required in &self.config.required_paths {
            let full = path.join(required);
            match path_state(&full).await {
                PathState::Missing => {
                    report
                        .issues
                        .push(ValidationIssue::MissingRequired(required.clone()));
                    report.required_missing.push(required.clone());
                }
                PathState::Empty => {
                    report
                        .issues
                        .push(ValidationIssue::EmptyRequired(required.clone()));
                    report.required_present.push(required.clone());
                }
                PathState::Populated => report.required_present.push(required.clone()),
            }
        }

        for optional in &self.config.optional_paths {
            if matches!(path_state(&path.join(optional)).await, PathState::Missing) {
                report
                    .warnings
                    .push(ValidationWarning::MissingOptional(optional.clone()));
            }
        }

        match self.stale_artifacts(path).await {
            Ok(stale) => report
                .issues
                .extend(stale.into_iter().map(ValidationIssue::StaleArtifact)),
            Err(err) => report.issues.push(ValidationIssue::Unreadable(err.to_string())),
        }

        match dir_stats(path).await {
            Ok(stats) => report.total_size_bytes = stats.size_bytes,
            Err(err) => report.issues.push(ValidationIssue::Unreadable(err.to_string())),
        }

        self.finish(report)
    }

    fn finish(&self, mut report: ValidationReport) -> ValidationReport {
        report.is_valid = report.exists
            && report.issues.is_empty()
            && report.required_missing.is_empty();
        emit(
            self.logger.as_ref(),
            AuditEntry::new(AuditLevel::Debug, "validator", "session validated")
                .with_field("path", report.path.display().to_string())
                .with_field("is_valid", report.is_valid)
                .with_field("issues", report.issues.len())
                .with_field("warnings", report.warnings.len()),
        );
        report
    }

    /// Existence check of the directory and its first two required paths.
    pub async fn quick_validate(&self, path: &Path) -> bool {
        if !tokio::fs::metadata(path).await.is_ok_and(|m| m.is_dir()) {
            return false;
        }
        for required in self.config.required_paths.iter().take(QUICK_CHECK_DEPTH) {
            if tokio::fs::metadata(path.join(required)).await.is_err() {
                return false;
            }
        }
        true
    }

    /// Whether any authentication path exists and is non-empty.
    pub async fn has_auth_data(&self, path: &Path) -> bool {
        for auth in &self.config.auth_paths {
            if matches!(path_state(&path.join(auth)).await, PathState::Populated) {
                return true;
            }
        }
        false
    }

    /// Artifacts matching a configured pattern and older than the age threshold.
    ///
    /// Matching is on the file name anywhere in the tree; links are judged by
    /// their own modification time.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the tree cannot be walked.
    pub async fn stale_artifacts(&self, path: &Path) -> crate::Result<Vec<PathBuf>> {
        if self.artifacts.is_empty() {
            return Ok(Vec::new());
        }
        let threshold = Duration::from_secs(self.config.stale_artifact_age_seconds);
        let now = Utc::now();

        let mut stale = Vec::new();
        for entry in walk(path).await? {
            if entry.is_dir {
                continue;
            }
            let Some(name) = entry.path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !self.artifacts.iter().any(|pattern| pattern.matches(name)) {
                continue;
            }
            let old_enough = match entry.modified {
                Some(modified) => (now - modified)
                    .to_std()
                    .is_ok_and(|age| age >= threshold),
                None => true,
            };
            if old_enough {
                stale.push(entry.path);
            }
        }
        stale.sort();
        Ok(stale)
    }
}

enum PathState {
    Missing,
    Empty,
    Populated,
}

async fn path_state(path: &Path) -> PathState {
    match tokio::fs::metadata(path).await {
        Err(_) => PathState::Missing,
        Ok(meta) if meta.is_dir() => {
            if dir_has_entries(path).await {
                PathState::Populated
            } else {
                PathState::Empty
            }
        }
        Ok(meta) if meta.len() == 0 => PathState::Empty,
        Ok(_) => PathState::Populated,
    }
}
