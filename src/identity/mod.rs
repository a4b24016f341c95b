//! Instance identity resolution.
//!
//! Turns explicit options, configuration, environment flags, supervisor
//! metadata and the source-control branch into an [`InstanceIdentity`].
//!
//! # Precedence
//!
//! 1. Explicit strategy override ([`ResolveOptions::strategy`]) or explicit
//!    instance id.
//! 2. Environment flags, in fixed priority order:
//!    team > pattern-based > branch-specific > shared.
//! 3. The configured default strategy.
//! 4. Shared, attributed to the supervisor or to direct execution.
//!
//! Branch and pattern strategies then look at the current branch: only
//! feature-pattern branches get their own session; main branches, other
//! branches, detached HEADs and unknown states map to the shared session.
//! [`IdentityResolver::resolve`] never fails; any internal error degrades
//! to the shared fallback identity.

pub mod branch;
pub mod env;
pub mod sanitize;

use glob::Pattern;

use crate::audit::{emit, AuditEntry, AuditLevel, SharedLogger};
use crate::config::IdentityConfig;
use crate::models::identity::{IdentitySource, IdentityStrategy, InstanceIdentity, SHARED_ID};
use crate::{AppError, Result};

use self::branch::{BranchDetector, BranchState};
use self::env::Environment;
use self::sanitize::sanitize_id;

/// Caller-supplied resolution inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Strategy override; beats environment and configuration.
    pub strategy: Option<IdentityStrategy>,
    /// Explicit identity id; beats everything.
    pub instance_id: Option<String>,
    /// Team name for the team strategy.
    pub team: Option<String>,
}

impl ResolveOptions {
    /// Options forcing `strategy`.
    #[must_use]
    pub fn with_strategy(strategy: IdentityStrategy) -> Self {
        Self {
            strategy: Some(strategy),
            ..Self::default()
        }
    }
}

/// Resolves the identity of this process.
pub struct IdentityResolver {
    config: IdentityConfig,
    env: Environment,
    patterns: Vec<Pattern>,
    branches: BranchDetector,
    logger: SharedLogger,
}

impl IdentityResolver {
    /// Construct a resolver over a fixed environment snapshot.
    ///
    /// Feature patterns that fail to compile are logged and skipped.
    #[must_use]
    pub fn new(config: IdentityConfig, env: Environment, logger: SharedLogger) -> Self {
        let patterns = config
            .feature_patterns
            .iter()
            .filter_map(|raw| match Pattern::new(raw) {
                Ok(pattern) => Some(pattern),
                Err(err) => {
                    emit(
                        logger.as_ref(),
                        AuditEntry::new(AuditLevel::Warn, "identity", "skipping invalid pattern")
                            .with_field("pattern", raw.as_str())
                            .with_field("error", err.to_string()),
                    );
                    None
                }
            })
            .collect();
        let branches = BranchDetector::new(
            config.repo_dir.clone(),
            config.use_git_command,
            logger.clone(),
        );
        Self {
            config,
            env,
            patterns,
            branches,
            logger,
        }
    }

    /// Environment snapshot in use.
    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Branch detector owned by this resolver.
    #[must_use]
    pub fn branch_detector(&self) -> &BranchDetector {
        &self.branches
    }

    /// Drop cached detection results so the next resolve re-reads the branch.
    pub fn invalidate_cache(&self) {
        self.branches.invalidate();
    }

    /// Resolve the identity. Never fails.
    pub async fn resolve(&self, options: &ResolveOptions) -> InstanceIdentity {
        match self.try_resolve(options).await {
            Ok(identity) => {
                emit(
                    self.logger.as_ref(),
                    AuditEntry::new(AuditLevel::Info, "identity", "identity resolved")
                        .with_field("id", identity.id.as_str())
                        .with_field("strategy", identity.strategy.to_string())
                        .with_field("source", format!("{:?}", identity.source)),
                );
                identity
            }
            Err(err) => {
                emit(
                    self.logger.as_ref(),
                    AuditEntry::new(
                        AuditLevel::Warn,
                        "identity",
                        "identity resolution failed, using shared fallback",
                    )
                    .with_field("error", err.to_string()),
                );
                InstanceIdentity::fallback()
            }
        }
    }

    async fn try_resolve(&self, options: &ResolveOptions) -> Result<InstanceIdentity> {
        let explicit_id = options
            .instance_id
            .as_deref()
            .or(self.config.instance_id.as_deref());
        if let Some(raw) = explicit_id {
            return Ok(self.explicit_identity(raw, options.strategy));
        }

        let (strategy, source) = self.select_strategy(options);
        match strategy {
            IdentityStrategy::Shared => Ok(InstanceIdentity::shared(source)),
            IdentityStrategy::Team => {
                let team = options
                    .team
                    .as_deref()
                    .or_else(|| self.env.get(env::TEAM_VAR))
                    .ok_or_else(|| {
                        AppError::Config(format!(
                            "team strategy selected but no team name given ({} unset)",
                            env::TEAM_VAR
                        ))
                    })?;
                Ok(InstanceIdentity {
                    strategy: IdentityStrategy::Team,
                    id: self.sanitize(team),
                    source,
                })
            }
            IdentityStrategy::BranchSpecific | IdentityStrategy::PatternBased => {
                let state = self.branches.detect(&self.env).await;
                Ok(self.classify_branch(&state, source))
            }
        }
    }

    fn explicit_identity(
        &self,
        raw: &str,
        strategy: Option<IdentityStrategy>,
    ) -> InstanceIdentity {
        let id = self.sanitize(raw);
        let strategy = match strategy {
            Some(strategy) => strategy,
            None if id == SHARED_ID => IdentityStrategy::Shared,
            None => IdentityStrategy::Team,
        };
        InstanceIdentity {
            strategy,
            id,
            source: IdentitySource::ConfigOverride,
        }
    }

    fn select_strategy(&self, options: &ResolveOptions) -> (IdentityStrategy, IdentitySource) {
        if let Some(strategy) = options.strategy {
            return (strategy, IdentitySource::ConfigOverride);
        }

        if self.env.get(env::TEAM_VAR).is_some() {
            return (IdentityStrategy::Team, IdentitySource::EnvVar);
        }
        if self.env.flag(env::PATTERN_BASED_VAR) {
            return (IdentityStrategy::PatternBased, IdentitySource::EnvVar);
        }
        if self.env.flag(env::BRANCH_SPECIFIC_VAR) {
            return (IdentityStrategy::BranchSpecific, IdentitySource::EnvVar);
        }
        if self.env.flag(env::SHARED_VAR) {
            return (IdentityStrategy::Shared, IdentitySource::EnvVar);
        }

        if let Some(strategy) = self.config.strategy {
            return (strategy, IdentitySource::ConfigOverride);
        }

        (IdentityStrategy::Shared, self.launch_source())
    }

    fn launch_source(&self) -> IdentitySource {
        if self.env.under_supervisor() {
            emit(
                self.logger.as_ref(),
                AuditEntry::new(AuditLevel::Debug, "identity", "process supervisor detected")
                    .with_field("app", self.env.supervisor_app().unwrap_or_default())
                    .with_field(
                        "instance",
                        self.env.supervisor_instance().unwrap_or_default(),
                    ),
            );
            IdentitySource::ProcessSupervisor
        } else {
            IdentitySource::DirectExecution
        }
    }

    /// Map a branch state to an identity under a branch-aware strategy.
    ///
    /// Main branches share, feature-pattern branches get their own session,
    /// everything else shares.
    #[must_use]
    pub fn classify_branch(&self, state: &BranchState, source: IdentitySource) -> InstanceIdentity {
        let branch = match state {
            BranchState::Named(branch) => branch,
            BranchState::Detached => return InstanceIdentity::shared(IdentitySource::GitBranch),
            BranchState::Unknown => return InstanceIdentity::shared(source),
        };

        if self.is_main_branch(branch) || !self.is_feature_branch(branch) {
            return InstanceIdentity::shared(IdentitySource::GitBranch);
        }

        InstanceIdentity {
            strategy: IdentityStrategy::BranchSpecific,
            id: self.sanitize(branch),
            source: IdentitySource::GitBranch,
        }
    }

    /// Whether `branch` is one of the configured main branches.
    #[must_use]
    pub fn is_main_branch(&self, branch: &str) -> bool {
        self.config.main_branches.iter().any(|main| main == branch)
    }

    /// Whether `branch` matches a feature pattern.
    #[must_use]
    pub fn is_feature_branch(&self, branch: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(branch))
    }

    /// Sanitize with the configured length cap.
    #[must_use]
    pub fn sanitize(&self, raw: &str) -> String {
        sanitize_id(raw, self.config.max_id_length)
    }
}
