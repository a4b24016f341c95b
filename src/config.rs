//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::models::identity::IdentityStrategy;
use crate::models::recovery::RecoveryOptions;
use crate::{AppError, Result};

/// Identity resolution settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct IdentityConfig {
    /// Strategy used when neither an override nor an env flag selects one.
    pub strategy: Option<IdentityStrategy>,
    /// Explicit identity id; wins over every detected input.
    pub instance_id: Option<String>,
    /// Working copy used for branch detection.
    pub repo_dir: PathBuf,
    /// Branches that always map to the shared session.
    pub main_branches: Vec<String>,
    /// Glob patterns of feature-like branches.
    pub feature_patterns: Vec<String>,
    /// Maximum identity id length before hashing kicks in.
    pub max_id_length: usize,
    /// Whether to shell out to `git` when `.git/HEAD` cannot be read.
    pub use_git_command: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            strategy: None,
            instance_id: None,
            repo_dir: PathBuf::from("."),
            main_branches: ["main", "master", "develop", "trunk"]
                .map(String::from)
                .to_vec(),
            feature_patterns: [
                "feature/*",
                "feat/*",
                "bugfix/*",
                "fix/*",
                "hotfix/*",
                "release/*",
            ]
            .map(String::from)
            .to_vec(),
            max_id_length: 48,
            use_git_command: true,
        }
    }
}

/// Lock file timing settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct LockConfig {
    /// Age after which a live owner's lock is treated as stale.
    pub stale_after_seconds: u64,
    /// Extra attempts after the first contention.
    pub retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay_ms: u64,
    /// Heartbeat period; 0 derives it from `stale_after_seconds`.
    pub heartbeat_seconds: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_seconds: 300,
            retries: 3,
            retry_delay_ms: 1000,
            heartbeat_seconds: 0,
        }
    }
}

impl LockConfig {
    /// Staleness threshold.
    #[must_use]
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_seconds)
    }

    /// Delay between acquisition attempts.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Interval at which the owner refreshes its record.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        if self.heartbeat_seconds > 0 {
            Duration::from_secs(self.heartbeat_seconds)
        } else {
            Duration::from_secs((self.stale_after_seconds / 3).max(1))
        }
    }
}

/// Session directory layout expectations.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ValidationConfig {
    /// Sub-paths that must exist and be non-empty. The first two form the
    /// quick check.
    pub required_paths: Vec<String>,
    /// Sub-paths whose absence is only a warning.
    pub optional_paths: Vec<String>,
    /// Sub-paths holding authentication state.
    pub auth_paths: Vec<String>,
    /// Sub-paths the browser regenerates on demand.
    pub cache_paths: Vec<String>,
    /// File-name glob patterns of lock/log artifacts.
    pub stale_artifacts: Vec<String>,
    /// Age after which an artifact counts as stale.
    pub stale_artifact_age_seconds: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            required_paths: [
                "session",
                "session/Default",
                "session/Default/Local Storage",
                "session/Default/IndexedDB",
            ]
            .map(String::from)
            .to_vec(),
            optional_paths: [
                "session/Local State",
                "session/Default/Preferences",
                "session/Default/Cookies",
            ]
            .map(String::from)
            .to_vec(),
            auth_paths: ["session/Default/Local Storage", "session/Default/IndexedDB"]
                .map(String::from)
                .to_vec(),
            cache_paths: [
                "session/Default/Cache",
                "session/Default/Code Cache",
                "session/Default/GPUCache",
                "session/Default/Service Worker/CacheStorage",
            ]
            .map(String::from)
            .to_vec(),
            stale_artifacts: [
                "SingletonLock",
                "SingletonSocket",
                "SingletonCookie",
                "DevToolsActivePort",
                "*.tmp",
            ]
            .map(String::from)
            .to_vec(),
            stale_artifact_age_seconds: 3600,
        }
    }
}

/// Automatic repair settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct RecoveryConfig {
    /// Whether startup repairs corrupted sessions.
    pub enabled: bool,
    /// Back up before destructive levels.
    pub auto_backup: bool,
    /// Re-validate and escalate.
    pub validate_after: bool,
    /// Wall-clock budget for one run.
    pub max_recovery_seconds: u64,
    /// Backups retained per session directory.
    pub keep_backups: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_backup: true,
            validate_after: true,
            max_recovery_seconds: 30,
            keep_backups: 5,
        }
    }
}

impl RecoveryConfig {
    /// Options for [`crate::session::recovery::RecoveryManager`].
    #[must_use]
    pub fn options(&self) -> RecoveryOptions {
        RecoveryOptions {
            auto_backup_before_recovery: self.auto_backup,
            validate_after_recovery: self.validate_after,
            max_recovery_time_ms: self.max_recovery_seconds.saturating_mul(1000),
        }
    }
}

/// Duplicate-directory reconciliation settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ConsolidationConfig {
    /// Consolidate at startup when the identity is shared.
    pub on_startup: bool,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self { on_startup: true }
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".sessions")
}

fn default_session_prefix() -> String {
    ".auth".into()
}

fn default_lock_file_name() -> String {
    ".session.lock".into()
}

fn default_policy_file_name() -> String {
    ".session-policy.json".into()
}

fn default_backups_dir() -> String {
    "backups".into()
}

/// Global configuration parsed from `warden.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory holding session directories, the lock file and backups.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    /// Session directories are named `<prefix>_<instance id>`.
    #[serde(default = "default_session_prefix")]
    pub session_prefix: String,
    /// Lock file name inside `base_dir`.
    #[serde(default = "default_lock_file_name")]
    pub lock_file_name: String,
    /// Policy state file name inside `base_dir`.
    #[serde(default = "default_policy_file_name")]
    pub policy_file_name: String,
    /// Backup directory name inside `base_dir`.
    #[serde(default = "default_backups_dir")]
    pub backups_dir: String,
    /// Directory for JSONL audit logs; disabled when absent.
    #[serde(default)]
    pub audit_log_dir: Option<PathBuf>,
    /// Identity resolution.
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Lock timing.
    #[serde(default)]
    pub lock: LockConfig,
    /// Layout expectations.
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Automatic repair.
    #[serde(default)]
    pub recovery: RecoveryConfig,
    /// Duplicate reconciliation.
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            session_prefix: default_session_prefix(),
            lock_file_name: default_lock_file_name(),
            policy_file_name: default_policy_file_name(),
            backups_dir: default_backups_dir(),
            audit_log_dir: None,
            identity: IdentityConfig::default(),
            lock: LockConfig::default(),
            validation: ValidationConfig::default(),
            recovery: RecoveryConfig::default(),
            consolidation: ConsolidationConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Load from `path` when given, otherwise use the defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or is invalid.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Lock file path for this base directory.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.base_dir.join(&self.lock_file_name)
    }

    /// Policy state file path.
    #[must_use]
    pub fn policy_path(&self) -> PathBuf {
        self.base_dir.join(&self.policy_file_name)
    }

    /// Backup root directory.
    #[must_use]
    pub fn backups_path(&self) -> PathBuf {
        self.base_dir.join(&self.backups_dir)
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.base_dir.as_os_str().is_empty() {
            return Err(AppError::Config("base_dir must not be empty".into()));
        }

        if self.session_prefix.is_empty() || self.session_prefix.contains(['/', '\\']) {
            return Err(AppError::Config(
                "session_prefix must be a non-empty file name".into(),
            ));
        }

        for (field, value) in [
            ("lock_file_name", &self.lock_file_name),
            ("policy_file_name", &self.policy_file_name),
            ("backups_dir", &self.backups_dir),
        ] {
            if value.is_empty() || value.contains(['/', '\\']) {
                return Err(AppError::Config(format!(
                    "{field} must be a non-empty file name"
                )));
            }
            if value.starts_with(&format!("{}_", self.session_prefix)) {
                return Err(AppError::Config(format!(
                    "{field} must not use the session naming convention"
                )));
            }
        }

        if self.lock.stale_after_seconds == 0 {
            return Err(AppError::Config(
                "lock.stale_after_seconds must be greater than zero".into(),
            ));
        }

        if self.lock.retries > 100 {
            return Err(AppError::Config("lock.retries must be at most 100".into()));
        }

        if self.recovery.keep_backups == 0 {
            return Err(AppError::Config(
                "recovery.keep_backups must be at least 1".into(),
            ));
        }

        if self.identity.max_id_length < 16 {
            return Err(AppError::Config(
                "identity.max_id_length must be at least 16".into(),
            ));
        }

        for pattern in self
            .identity
            .feature_patterns
            .iter()
            .chain(&self.validation.stale_artifacts)
        {
            glob::Pattern::new(pattern)
                .map_err(|err| AppError::Config(format!("invalid pattern '{pattern}': {err}")))?;
        }

        if self.validation.required_paths.is_empty() {
            return Err(AppError::Config(
                "validation.required_paths must not be empty".into(),
            ));
        }

        Ok(())
    }
}
