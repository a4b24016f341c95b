//! Session directory and policy-state models.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identity::{IdentityStrategy, InstanceIdentity};

/// On-disk persisted state for one authenticated automation session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionDirectory {
    /// Absolute or base-relative directory path.
    pub path: PathBuf,
    /// Identity id parsed from the directory name.
    pub instance_id: String,
    /// Total size of regular files, recursively.
    pub size_bytes: u64,
    /// Number of regular files, recursively.
    pub file_count: u64,
    /// Newest modification time found in the tree.
    pub last_modified_at: Option<DateTime<Utc>>,
    /// Whether the quick structural check passes.
    pub structurally_valid: bool,
    /// Whether any authentication artifact is present.
    pub has_auth_data: bool,
}

/// Last identity this base directory was used with.
///
/// Persisted next to the lock file so a later start can tell whether the
/// identity policy changed and a migration is due.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PolicyState {
    /// Strategy in effect at the last start.
    pub strategy: IdentityStrategy,
    /// Identity id in effect at the last start.
    pub instance_id: String,
    /// Session directory name in effect at the last start.
    pub session_dir: String,
    /// When the state was written.
    pub updated_at: DateTime<Utc>,
}

impl PolicyState {
    /// Capture the state for `identity` now.
    #[must_use]
    pub fn new(identity: &InstanceIdentity, session_dir: String) -> Self {
        Self {
            strategy: identity.strategy,
            instance_id: identity.id.clone(),
            session_dir,
            updated_at: Utc::now(),
        }
    }

    /// Whether `identity` differs from the recorded one.
    #[must_use]
    pub fn differs_from(&self, identity: &InstanceIdentity) -> bool {
        self.strategy != identity.strategy || self.instance_id != identity.id
    }
}

/// One snapshot under the backup root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BackupEntry {
    /// Backup directory.
    pub path: PathBuf,
    /// Name of the session directory that was backed up.
    pub session_dir: String,
    /// Snapshot time, second precision.
    pub created_at: DateTime<Utc>,
    /// Disambiguates snapshots taken within the same second.
    pub sequence: u32,
}
