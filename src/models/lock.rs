//! Lock record model and on-disk format.
//!
//! A lock file holds either a structured JSON record or, for files written
//! by older releases, a bare PID. Both are parsed once into [`LockRecord`].

use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of one lock path within this process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    /// No lock held.
    Unlocked,
    /// Acquisition in progress (including retry delays).
    Acquiring,
    /// This process owns the lock file.
    Locked,
    /// Release in progress.
    Releasing,
}

/// Wire shape of a structured lock file.
///
/// `timestamp` is milliseconds since the Unix epoch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LockFileBody {
    /// Owning process id.
    pub pid: u32,
    /// Acquisition time in epoch milliseconds.
    pub timestamp: i64,
    /// Identity id of the owner.
    #[serde(default)]
    pub instance_id: Option<String>,
    /// Owner host platform (`linux`, `macos`, ...).
    #[serde(default)]
    pub platform: Option<String>,
    /// Owner build version.
    #[serde(default)]
    pub runtime_version: Option<String>,
}

/// Owner marker of a lock file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum LockRecord {
    /// Bare-PID file; the timestamp comes from the file's modification time.
    Legacy {
        /// Owning process id.
        pid: u32,
        /// Best-effort acquisition time.
        acquired_at: DateTime<Utc>,
    },
    /// JSON record written by current releases.
    Structured {
        /// Owning process id.
        pid: u32,
        /// Acquisition (or last heartbeat) time.
        acquired_at: DateTime<Utc>,
        /// Identity id of the owner.
        instance_id: Option<String>,
        /// Owner host platform.
        host_platform: Option<String>,
        /// Owner build version.
        runtime_version: Option<String>,
    },
}

impl LockRecord {
    /// Record for a process acquiring the lock now.
    #[must_use]
    pub fn for_process(pid: u32, instance_id: Option<String>) -> Self {
        Self::Structured {
            pid,
            acquired_at: Utc::now(),
            instance_id,
            host_platform: Some(std::env::consts::OS.to_owned()),
            runtime_version: Some(env!("CARGO_PKG_VERSION").to_owned()),
        }
    }

    /// Parse lock-file content.
    ///
    /// `modified_at` supplies the timestamp of legacy bare-PID files.
    /// Returns `None` when the content is neither format.
    #[must_use]
    pub fn parse(content: &str, modified_at: DateTime<Utc>) -> Option<Self> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return None;
        }

        if let Ok(pid) = trimmed.parse::<u32>() {
            return Some(Self::Legacy {
                pid,
                acquired_at: modified_at,
            });
        }

        let body: LockFileBody = serde_json::from_str(trimmed).ok()?;
        let acquired_at = Utc
            .timestamp_millis_opt(body.timestamp)
            .single()
            .unwrap_or(modified_at);
        Some(Self::Structured {
            pid: body.pid,
            acquired_at,
            instance_id: body.instance_id,
            host_platform: body.platform,
            runtime_version: body.runtime_version,
        })
    }

    /// Serialize for writing to disk. Legacy records are upgraded.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if serialization fails.
    pub fn to_file_contents(&self) -> serde_json::Result<String> {
        let body = match self {
            Self::Legacy { pid, acquired_at } => LockFileBody {
                pid: *pid,
                timestamp: acquired_at.timestamp_millis(),
                instance_id: None,
                platform: None,
                runtime_version: None,
            },
            Self::Structured {
                pid,
                acquired_at,
                instance_id,
                host_platform,
                runtime_version,
            } => LockFileBody {
                pid: *pid,
                timestamp: acquired_at.timestamp_millis(),
                instance_id: instance_id.clone(),
                platform: host_platform.clone(),
                runtime_version: runtime_version.clone(),
            },
        };
        serde_json::to_string_pretty(&body)
    }

    /// Owning process id.
    #[must_use]
    pub fn owner_pid(&self) -> u32 {
        match self {
            Self::Legacy { pid, .. } | Self::Structured { pid, .. } => *pid,
        }
    }

    /// Acquisition time, used only for staleness comparison.
    #[must_use]
    pub fn acquired_at(&self) -> DateTime<Utc> {
        match self {
            Self::Legacy { acquired_at, .. } | Self::Structured { acquired_at, .. } => *acquired_at,
        }
    }

    /// Owner identity id, when recorded.
    #[must_use]
    pub fn instance_id(&self) -> Option<&str> {
        match self {
            Self::Legacy { .. } => None,
            Self::Structured { instance_id, .. } => instance_id.as_deref(),
        }
    }

    /// Whether this record came from a bare-PID file.
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy { .. })
    }

    /// Copy of this record with a fresh acquisition time.
    #[must_use]
    pub fn refreshed(&self) -> Self {
        let now = Utc::now();
        match self.clone() {
            Self::Legacy { pid, .. } => Self::Legacy {
                pid,
                acquired_at: now,
            },
            Self::Structured {
                pid,
                instance_id,
                host_platform,
                runtime_version,
                ..
            } => Self::Structured {
                pid,
                acquired_at: now,
                instance_id,
                host_platform,
                runtime_version,
            },
        }
    }
}

/// Proof of ownership handed to the automation client after acquisition.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LockHandle {
    /// Lock file path.
    pub path: PathBuf,
    /// Record written for this process.
    pub record: LockRecord,
}

/// Read-only view of a lock file for diagnostics.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LockInfo {
    /// Lock file path.
    pub path: PathBuf,
    /// Parsed record; `None` when the file content is unreadable.
    pub record: Option<LockRecord>,
    /// Whether the recorded owner answered the liveness probe.
    pub owner_alive: bool,
    /// Whether the lock would be treated as stale by `acquire_lock`.
    pub is_stale: bool,
    /// Milliseconds since `acquired_at`.
    pub age_ms: i64,
    /// Whether the record names the calling process.
    pub held_by_current_process: bool,
}
