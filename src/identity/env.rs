//! Snapshot of the environment variables identity resolution reads.
//!
//! Resolution is a pure function of this snapshot, so two resolvers built
//! from equal snapshots always agree.

use std::collections::BTreeMap;

use tracing::debug;

/// Team name; selects the team strategy.
pub const TEAM_VAR: &str = "SESSION_TEAM";
/// Truthy flag selecting the pattern-based strategy.
pub const PATTERN_BASED_VAR: &str = "SESSION_PATTERN_BASED";
/// Truthy flag selecting the branch-specific strategy.
pub const BRANCH_SPECIFIC_VAR: &str = "SESSION_BRANCH_SPECIFIC";
/// Truthy flag selecting the shared strategy.
pub const SHARED_VAR: &str = "SESSION_SHARED";

/// Variables set by common process supervisors (supervisord, pm2, systemd).
pub const SUPERVISOR_VARS: &[&str] = &[
    "SUPERVISOR_PROCESS_NAME",
    "SUPERVISOR_GROUP_NAME",
    "pm_id",
    "NODE_APP_INSTANCE",
    "INVOCATION_ID",
];

/// App name variables, in lookup order.
const SUPERVISOR_APP_VARS: &[&str] = &["SUPERVISOR_PROCESS_NAME", "name"];
/// Instance index variables, in lookup order.
const SUPERVISOR_INSTANCE_VARS: &[&str] = &["NODE_APP_INSTANCE", "pm_id"];

/// CI variables carrying the branch under build, in lookup order.
pub const CI_BRANCH_VARS: &[&str] = &[
    "GITHUB_HEAD_REF",
    "GITHUB_REF_NAME",
    "CI_COMMIT_REF_NAME",
    "BUILDKITE_BRANCH",
    "BRANCH_NAME",
    "GIT_BRANCH",
];

/// Relevant environment variables captured once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Capture the variables of the current process.
    ///
    /// Variables whose name or value is not valid UTF-8 are skipped.
    #[must_use]
    pub fn from_process() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
                (Ok(key), Ok(value)) => Some((key, value)),
                (Ok(key), Err(_)) => {
                    debug!(%key, "skipping environment variable with non-UTF-8 value");
                    None
                }
                (Err(key), _) => {
                    debug!(key = %key.to_string_lossy(), "skipping non-UTF-8 environment variable");
                    None
                }
            })
            .collect();
        Self { vars }
    }

    /// Build a snapshot from explicit pairs.
    #[must_use]
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Trimmed, non-empty value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Whether `key` holds a truthy value (`1`, `true`, `yes`, `on`).
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| {
            matches!(
                v.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }

    /// Whether a process supervisor launched this process.
    #[must_use]
    pub fn under_supervisor(&self) -> bool {
        SUPERVISOR_VARS.iter().any(|key| self.get(key).is_some())
    }

    /// Supervisor app name, when set.
    #[must_use]
    pub fn supervisor_app(&self) -> Option<&str> {
        SUPERVISOR_APP_VARS.iter().find_map(|key| self.get(key))
    }

    /// Supervisor instance index, when set.
    #[must_use]
    pub fn supervisor_instance(&self) -> Option<&str> {
        SUPERVISOR_INSTANCE_VARS.iter().find_map(|key| self.get(key))
    }

    /// Branch reported by a CI system, when set.
    #[must_use]
    pub fn ci_branch(&self) -> Option<String> {
        CI_BRANCH_VARS.iter().find_map(|key| {
            self.get(key).map(|value| {
                let value = value.strip_prefix("refs/heads/").unwrap_or(value);
                value.strip_prefix("origin/").unwrap_or(value).to_owned()
            })
        })
    }
}
