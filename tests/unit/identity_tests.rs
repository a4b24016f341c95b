//! Identity resolution precedence and branch classification.

use std::path::Path;
use std::sync::Arc;

use serial_test::serial;
use session_warden::audit::{AuditLevel, MemoryAuditLog, SharedLogger};
use session_warden::config::IdentityConfig;
use session_warden::identity::branch::BranchState;
use session_warden::identity::env::{
    Environment, BRANCH_SPECIFIC_VAR, PATTERN_BASED_VAR, SHARED_VAR, TEAM_VAR,
};
use session_warden::identity::sanitize::sanitize_id;
use session_warden::identity::{IdentityResolver, ResolveOptions};
use session_warden::models::identity::{IdentitySource, IdentityStrategy, SHARED_ID};

/// Config that never shells out and looks for `.git` in `repo_dir` only.
fn config(repo_dir: &Path) -> IdentityConfig {
    IdentityConfig {
        repo_dir: repo_dir.to_path_buf(),
        use_git_command: false,
        ..IdentityConfig::default()
    }
}

fn resolver(repo_dir: &Path, pairs: &[(&str, &str)]) -> (IdentityResolver, Arc<MemoryAuditLog>) {
    let log = Arc::new(MemoryAuditLog::new());
    let logger: SharedLogger = log.clone();
    let env = Environment::from_pairs(pairs.iter().copied());
    (IdentityResolver::new(config(repo_dir), env, logger), log)
}

#[tokio::test]
async fn no_inputs_resolve_to_shared_direct_execution() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (resolver, _) = resolver(temp.path(), &[]);

    let identity = resolver.resolve(&ResolveOptions::default()).await;
    assert_eq!(identity.id, SHARED_ID);
    assert_eq!(identity.strategy, IdentityStrategy::Shared);
    assert_eq!(identity.source, IdentitySource::DirectExecution);
}

#[tokio::test]
async fn supervisor_launch_is_attributed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (resolver, _) = resolver(temp.path(), &[("pm_id", "3")]);

    let identity = resolver.resolve(&ResolveOptions::default()).await;
    assert!(identity.is_shared());
    assert_eq!(identity.source, IdentitySource::ProcessSupervisor);
}

#[tokio::test]
async fn team_variable_selects_team_strategy() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (resolver, _) = resolver(temp.path(), &[(TEAM_VAR, "Alpha Team")]);

    let identity = resolver.resolve(&ResolveOptions::default()).await;
    assert_eq!(identity.strategy, IdentityStrategy::Team);
    assert_eq!(identity.id, "alpha-team");
    assert_eq!(identity.source, IdentitySource::EnvVar);
}

#[tokio::test]
async fn team_beats_every_other_flag() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (resolver, _) = resolver(
        temp.path(),
        &[
            (TEAM_VAR, "qa"),
            (PATTERN_BASED_VAR, "1"),
            (BRANCH_SPECIFIC_VAR, "true"),
            (SHARED_VAR, "yes"),
        ],
    );

    let identity = resolver.resolve(&ResolveOptions::default()).await;
    assert_eq!(identity.strategy, IdentityStrategy::Team);
    assert_eq!(identity.id, "qa");
}

#[tokio::test]
async fn branch_flag_uses_ci_branch() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (resolver, _) = resolver(
        temp.path(),
        &[(BRANCH_SPECIFIC_VAR, "1"), ("GITHUB_HEAD_REF", "feature/Login")],
    );

    let identity = resolver.resolve(&ResolveOptions::default()).await;
    assert_eq!(identity.strategy, IdentityStrategy::BranchSpecific);
    assert_eq!(identity.id, "feature-login");
    assert_eq!(identity.source, IdentitySource::GitBranch);
}

#[tokio::test]
async fn main_branch_maps_to_shared() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (resolver, _) = resolver(
        temp.path(),
        &[(BRANCH_SPECIFIC_VAR, "1"), ("BRANCH_NAME", "main")],
    );

    let identity = resolver.resolve(&ResolveOptions::default()).await;
    assert!(identity.is_shared());
    assert_eq!(identity.source, IdentitySource::GitBranch);
}

#[tokio::test]
async fn pattern_strategy_only_splits_feature_branches() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (feature, _) = resolver(
        temp.path(),
        &[(PATTERN_BASED_VAR, "on"), ("GITHUB_HEAD_REF", "feature/search")],
    );
    let (other, _) = resolver(
        temp.path(),
        &[(PATTERN_BASED_VAR, "on"), ("GITHUB_HEAD_REF", "experiment/search")],
    );

    let feature = feature.resolve(&ResolveOptions::default()).await;
    assert_eq!(feature.id, "feature-search");
    let other = other.resolve(&ResolveOptions::default()).await;
    assert!(other.is_shared());
}

#[tokio::test]
async fn branch_strategy_shares_non_feature_branches() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (resolver, _) = resolver(
        temp.path(),
        &[(BRANCH_SPECIFIC_VAR, "1"), ("GITHUB_HEAD_REF", "experiment/search")],
    );

    let identity = resolver.resolve(&ResolveOptions::default()).await;
    assert!(identity.is_shared());
    assert_eq!(identity.source, IdentitySource::GitBranch);
}

#[test]
fn both_branch_strategies_classify_alike() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (resolver, _) = resolver(temp.path(), &[]);

    for (branch, own) in [("feature/a", true), ("main", false), ("spike/b", false)] {
        let identity =
            resolver.classify_branch(&BranchState::Named(branch.into()), IdentitySource::EnvVar);
        assert_eq!(!identity.is_shared(), own, "{branch}");
    }
}

#[tokio::test]
async fn strategy_override_beats_environment() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (resolver, _) = resolver(temp.path(), &[(TEAM_VAR, "qa")]);

    let identity = resolver
        .resolve(&ResolveOptions::with_strategy(IdentityStrategy::Shared))
        .await;
    assert!(identity.is_shared());
    assert_eq!(identity.source, IdentitySource::ConfigOverride);
}

#[tokio::test]
async fn explicit_instance_id_beats_everything() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (resolver, _) = resolver(temp.path(), &[(TEAM_VAR, "qa")]);

    let options = ResolveOptions {
        instance_id: Some("Nightly Run".into()),
        ..ResolveOptions::default()
    };
    let identity = resolver.resolve(&options).await;
    assert_eq!(identity.id, "nightly-run");
    assert_eq!(identity.strategy, IdentityStrategy::Team);
    assert_eq!(identity.source, IdentitySource::ConfigOverride);

    let shared = ResolveOptions {
        instance_id: Some("shared".into()),
        ..ResolveOptions::default()
    };
    assert!(resolver.resolve(&shared).await.is_shared());
}

#[tokio::test]
async fn configured_strategy_applies_without_flags() {
    let temp = tempfile::tempdir().expect("tempdir");
    let log = Arc::new(MemoryAuditLog::new());
    let logger: SharedLogger = log.clone();
    let config = IdentityConfig {
        strategy: Some(IdentityStrategy::BranchSpecific),
        ..config(temp.path())
    };
    let env = Environment::from_pairs([("GIT_BRANCH", "origin/bugfix/crash")]);
    let resolver = IdentityResolver::new(config, env, logger);

    let identity = resolver.resolve(&ResolveOptions::default()).await;
    assert_eq!(identity.id, "bugfix-crash");
}

#[tokio::test]
async fn team_strategy_without_name_degrades_to_fallback() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (resolver, log) = resolver(temp.path(), &[]);

    let identity = resolver
        .resolve(&ResolveOptions::with_strategy(IdentityStrategy::Team))
        .await;
    assert!(identity.is_shared());
    assert_eq!(identity.source, IdentitySource::Fallback);
    assert!(log
        .at_least(AuditLevel::Warn)
        .iter()
        .any(|e| e.component == "identity"));
}

#[tokio::test]
async fn resolution_is_deterministic() {
    let temp = tempfile::tempdir().expect("tempdir");
    let pairs = [(BRANCH_SPECIFIC_VAR, "1"), ("GITHUB_HEAD_REF", "feature/x")];
    let (a, _) = resolver(temp.path(), &pairs);
    let (b, _) = resolver(temp.path(), &pairs);

    let first = a.resolve(&ResolveOptions::default()).await;
    assert_eq!(first, a.resolve(&ResolveOptions::default()).await);
    assert_eq!(first, b.resolve(&ResolveOptions::default()).await);
}

#[tokio::test]
async fn branch_read_from_git_head_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir(temp.path().join(".git")).expect("git dir");
    std::fs::write(
        temp.path().join(".git").join("HEAD"),
        "ref: refs/heads/feature/from-head\n",
    )
    .expect("HEAD");
    let (resolver, _) = resolver(temp.path(), &[(BRANCH_SPECIFIC_VAR, "1")]);

    let identity = resolver.resolve(&ResolveOptions::default()).await;
    assert_eq!(identity.id, "feature-from-head");
    assert_eq!(
        resolver.branch_detector().cached(),
        Some(BranchState::Named("feature/from-head".into()))
    );
}

#[tokio::test]
async fn branch_cache_is_dropped_on_invalidate() {
    let temp = tempfile::tempdir().expect("tempdir");
    let git = temp.path().join(".git");
    std::fs::create_dir(&git).expect("git dir");
    std::fs::write(git.join("HEAD"), "ref: refs/heads/feature/one\n").expect("HEAD");
    let (resolver, _) = resolver(temp.path(), &[(BRANCH_SPECIFIC_VAR, "1")]);

    assert_eq!(resolver.resolve(&ResolveOptions::default()).await.id, "feature-one");
    std::fs::write(git.join("HEAD"), "ref: refs/heads/feature/two\n").expect("HEAD");
    assert_eq!(resolver.resolve(&ResolveOptions::default()).await.id, "feature-one");

    resolver.invalidate_cache();
    assert_eq!(resolver.resolve(&ResolveOptions::default()).await.id, "feature-two");
}

#[test]
fn detached_head_classifies_as_shared() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (resolver, _) = resolver(temp.path(), &[]);

    let identity = resolver.classify_branch(&BranchState::Detached, IdentitySource::EnvVar);
    assert!(identity.is_shared());
    assert_eq!(identity.source, IdentitySource::GitBranch);
}

#[test]
fn sanitize_is_idempotent() {
    let long = "x".repeat(120);
    for raw in ["Feature/Login Page", "--weird..name--", "ÄÖÜ team", long.as_str()] {
        let once = sanitize_id(raw, 48);
        assert_eq!(sanitize_id(&once, 48), once, "not idempotent for {raw:?}");
        assert!(once.len() <= 48);
        assert!(once
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')));
    }
}

#[tokio::test]
#[serial]
async fn process_environment_snapshot_is_read_once() {
    std::env::set_var(TEAM_VAR, "snapshot-team");
    let env = Environment::from_process();
    std::env::remove_var(TEAM_VAR);

    let temp = tempfile::tempdir().expect("tempdir");
    let logger: SharedLogger = Arc::new(MemoryAuditLog::new());
    let resolver = IdentityResolver::new(config(temp.path()), env, logger);

    let identity = resolver.resolve(&ResolveOptions::default()).await;
    assert_eq!(identity.id, "snapshot-team");
}

#[cfg(unix)]
#[test]
#[serial]
fn process_snapshot_skips_non_utf8_variables() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let key = "SESSION_WARDEN_BINARY_VALUE";
    std::env::set_var(key, OsStr::from_bytes(&[0x66, 0xff, 0x6f]));
    std::env::set_var(TEAM_VAR, "still-readable");
    let env = Environment::from_process();
    std::env::remove_var(key);
    std::env::remove_var(TEAM_VAR);

    assert_eq!(env.get(key), None);
    assert_eq!(env.get(TEAM_VAR), Some("still-readable"));
}
