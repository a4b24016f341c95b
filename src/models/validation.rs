//! Session validation report model.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A problem that makes a session directory invalid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ValidationIssue {
    /// The session directory does not exist.
    DirectoryMissing,
    /// The session directory exists but contains nothing.
    DirectoryEmpty,
    /// The session directory could not be read.
    Unreadable(String),
    /// A required sub-path is absent.
    MissingRequired(String),
    /// A required sub-path exists but is empty.
    EmptyRequired(String),
    /// A browser lock or log artifact outlived its process.
    StaleArtifact(PathBuf),
}

impl Display for ValidationIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DirectoryMissing => write!(f, "session directory does not exist"),
            Self::DirectoryEmpty => write!(f, "session directory is empty"),
            Self::Unreadable(err) => write!(f, "session directory unreadable: {err}"),
            Self::MissingRequired(path) => write!(f, "required path missing: {path}"),
            Self::EmptyRequired(path) => write!(f, "required path is empty: {path}"),
            Self::StaleArtifact(path) => write!(f, "stale artifact: {}", path.display()),
        }
    }
}

/// A finding that does not invalidate a session directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ValidationWarning {
    /// An optional sub-path is absent.
    MissingOptional(String),
}

impl Display for ValidationWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingOptional(path) => write!(f, "optional path missing: {path}"),
        }
    }
}

/// Result of a deep validation pass over one session directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ValidationReport {
    /// Directory that was inspected.
    pub path: PathBuf,
    /// Whether the directory existed at all.
    pub exists: bool,
    /// True iff there are no issues and every required path is present.
    pub is_valid: bool,
    /// Problems found.
    pub issues: Vec<ValidationIssue>,
    /// Non-fatal findings.
    pub warnings: Vec<ValidationWarning>,
    /// Required sub-paths that were found.
    pub required_present: Vec<String>,
    /// Required sub-paths that were not found.
    pub required_missing: Vec<String>,
    /// Recursive size of regular files.
    pub total_size_bytes: u64,
}

impl ValidationReport {
    /// Stale artifacts listed among the issues.
    #[must_use]
    pub fn stale_artifacts(&self) -> Vec<PathBuf> {
        self.issues
            .iter()
            .filter_map(|issue| match issue {
                ValidationIssue::StaleArtifact(path) => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    /// Whether the report is entirely clean (no issues, no warnings).
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.is_valid && self.warnings.is_empty()
    }
}
