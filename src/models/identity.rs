//! Instance identity model.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::AppError;

/// Identity id used whenever the session is shared by every instance.
pub const SHARED_ID: &str = "shared";

/// Policy used to partition persisted sessions between instances.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStrategy {
    /// Every instance uses one session.
    Shared,
    /// Feature-pattern branches get their own session; selected by branch flags.
    BranchSpecific,
    /// Same branch rule as [`Self::BranchSpecific`]; selected by pattern flags.
    PatternBased,
    /// One session per configured team.
    Team,
}

impl IdentityStrategy {
    /// Whether this strategy needs the current source-control branch.
    #[must_use]
    pub fn needs_branch(self) -> bool {
        matches!(self, Self::BranchSpecific | Self::PatternBased)
    }
}

impl Display for IdentityStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Shared => "shared",
            Self::BranchSpecific => "branch_specific",
            Self::PatternBased => "pattern_based",
            Self::Team => "team",
        };
        f.write_str(name)
    }
}

impl FromStr for IdentityStrategy {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "shared" => Ok(Self::Shared),
            "branch" | "branch_specific" => Ok(Self::BranchSpecific),
            "pattern" | "pattern_based" => Ok(Self::PatternBased),
            "team" => Ok(Self::Team),
            other => Err(AppError::Config(format!(
                "unknown identity strategy '{other}'"
            ))),
        }
    }
}

/// Where the resolved identity came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    /// Explicit override argument or configured instance id.
    ConfigOverride,
    /// Strategy flag in the process environment.
    EnvVar,
    /// Derived from the current source-control branch.
    GitBranch,
    /// Launched by a process supervisor.
    ProcessSupervisor,
    /// Launched directly, no supervisor metadata.
    DirectExecution,
    /// Resolution failed somewhere; degraded to the shared session.
    Fallback,
}

/// Logical name a process computes to select the persisted session it owns.
///
/// Never mutated after resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub struct InstanceIdentity {
    /// Partitioning policy that produced this identity.
    pub strategy: IdentityStrategy,
    /// Filesystem-safe identity id.
    pub id: String,
    /// Input that decided the identity.
    pub source: IdentitySource,
}

impl InstanceIdentity {
    /// Identity of the shared session, attributed to `source`.
    #[must_use]
    pub fn shared(source: IdentitySource) -> Self {
        Self {
            strategy: IdentityStrategy::Shared,
            id: SHARED_ID.to_owned(),
            source,
        }
    }

    /// The last-resort identity used when resolution fails.
    #[must_use]
    pub fn fallback() -> Self {
        Self::shared(IdentitySource::Fallback)
    }

    /// Whether this identity names the shared session.
    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.strategy == IdentityStrategy::Shared
    }
}

impl Display for InstanceIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {:?})", self.id, self.strategy, self.source)
    }
}
