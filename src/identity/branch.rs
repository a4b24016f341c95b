//! Source-control branch detection with an explicit, owned cache.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;

use super::env::Environment;
use crate::audit::{emit, AuditEntry, AuditLevel, SharedLogger};

/// Upper bound for the `git rev-parse` fallback.
const GIT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// What the working copy's HEAD points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "branch", rename_all = "snake_case")]
pub enum BranchState {
    /// HEAD is on a named branch.
    Named(String),
    /// HEAD points at a commit, not a branch.
    Detached,
    /// No repository, or detection failed.
    Unknown,
}

/// Detects the current branch: CI variables, then `.git/HEAD`, then `git`.
///
/// The first successful detection is cached on the detector itself until
/// [`BranchDetector::invalidate`] is called.
pub struct BranchDetector {
    repo_dir: PathBuf,
    use_git_command: bool,
    logger: SharedLogger,
    cache: Mutex<Option<BranchState>>,
}

impl BranchDetector {
    /// Construct a detector for the working copy at `repo_dir`.
    #[must_use]
    pub fn new(repo_dir: PathBuf, use_git_command: bool, logger: SharedLogger) -> Self {
        Self {
            repo_dir,
            use_git_command,
            logger,
            cache: Mutex::new(None),
        }
    }

    /// Current branch state, from cache when available.
    pub async fn detect(&self, env: &Environment) -> BranchState {
        if let Some(cached) = self.cached() {
            return cached;
        }

        let state = self.detect_uncached(env).await;
        if let Ok(mut guard) = self.cache.lock() {
            *guard = Some(state.clone());
        }
        state
    }

    /// Drop the cached detection result.
    pub fn invalidate(&self) {
        if let Ok(mut guard) = self.cache.lock() {
            *guard = None;
        }
    }

    /// Cached result, if any.
    #[must_use]
    pub fn cached(&self) -> Option<BranchState> {
        self.cache.lock().ok().and_then(|guard| guard.clone())
    }

    async fn detect_uncached(&self, env: &Environment) -> BranchState {
        if let Some(branch) = env.ci_branch() {
            self.log(AuditLevel::Debug, "branch taken from ci environment", &branch);
            return BranchState::Named(branch);
        }

        match read_head_file(&self.repo_dir) {
            Ok(Some(state)) => return state,
            Ok(None) => {}
            Err(err) => {
                self.log(AuditLevel::Warn, "failed to read git HEAD", &err.to_string());
            }
        }

        if self.use_git_command {
            match git_rev_parse(&self.repo_dir).await {
                Ok(state) => return state,
                Err(err) => {
                    self.log(AuditLevel::Debug, "git rev-parse unavailable", &err);
                }
            }
        }

        BranchState::Unknown
    }

    fn log(&self, level: AuditLevel, message: &str, detail: &str) {
        emit(
            self.logger.as_ref(),
            AuditEntry::new(level, "identity", message)
                .with_field("repo_dir", self.repo_dir.display().to_string())
                .with_field("detail", detail),
        );
    }
}

/// Locate the git directory for `start`, following `gitdir:` files.
fn find_git_dir(start: &Path) -> std::io::Result<Option<PathBuf>> {
    let start = start.canonicalize()?;
    for dir in start.ancestors() {
        let candidate = dir.join(".git");
        if candidate.is_dir() {
            return Ok(Some(candidate));
        }
        if candidate.is_file() {
            let content = std::fs::read_to_string(&candidate)?;
            if let Some(target) = content.trim().strip_prefix("gitdir:") {
                let target = PathBuf::from(target.trim());
                let resolved = if target.is_absolute() {
                    target
                } else {
                    dir.join(target)
                };
                return Ok(Some(resolved));
            }
        }
    }
    Ok(None)
}

/// Parse `HEAD` content into a branch state.
#[must_use]
pub fn parse_head(content: &str) -> BranchState {
    let content = content.trim();
    if let Some(reference) = content.strip_prefix("ref:") {
        let reference = reference.trim();
        return match reference.strip_prefix("refs/heads/") {
            Some(branch) if !branch.is_empty() => BranchState::Named(branch.to_owned()),
            _ => BranchState::Unknown,
        };
    }
    if !content.is_empty() && content.chars().all(|c| c.is_ascii_hexdigit()) {
        return BranchState::Detached;
    }
    BranchState::Unknown
}

fn read_head_file(repo_dir: &Path) -> std::io::Result<Option<BranchState>> {
    let Some(git_dir) = find_git_dir(repo_dir)? else {
        return Ok(None);
    };
    let head = git_dir.join("HEAD");
    if !head.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(head)?;
    match parse_head(&content) {
        BranchState::Unknown => Ok(None),
        state => Ok(Some(state)),
    }
}

async fn git_rev_parse(repo_dir: &Path) -> std::result::Result<BranchState, String> {
    let output = tokio::time::timeout(
        GIT_COMMAND_TIMEOUT,
        Command::new("git")
            .arg("-C")
            .arg(repo_dir)
            .args(["rev-parse", "--abbrev-ref", "HEAD"])
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| "git rev-parse timed out".to_owned())?
    .map_err(|err| err.to_string())?;

    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).trim().to_owned());
    }

    let name = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    Ok(match name.as_str() {
        "" => BranchState::Unknown,
        "HEAD" => BranchState::Detached,
        _ => BranchState::Named(name),
    })
}
