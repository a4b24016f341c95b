//! Read-only health and inventory report for operators.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::identity::{IdentityResolver, ResolveOptions};
use crate::lock::LockFileManager;
use crate::models::identity::InstanceIdentity;
use crate::models::lock::LockInfo;
use crate::models::recovery::Severity;
use crate::models::session::{BackupEntry, PolicyState, SessionDirectory};
use crate::models::validation::ValidationReport;
use crate::session::recovery::assess_severity;
use crate::session::SessionStore;

/// Overall verdict of a diagnostics run.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    /// Nothing needs attention.
    Healthy,
    /// Usable, with housekeeping pending.
    Degraded,
    /// The next start will repair, reset or wait.
    Unhealthy,
}

/// Everything an operator needs to judge one base directory.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    /// When the report was taken.
    pub generated_at: DateTime<Utc>,
    /// Identity this process would resolve.
    pub identity: InstanceIdentity,
    /// Session path for that identity.
    pub session_path: PathBuf,
    /// Lock file state, when one exists.
    pub lock: Option<LockInfo>,
    /// Deep validation of the session path.
    pub validation: ValidationReport,
    /// Repair severity of the session path.
    pub severity: Severity,
    /// Every session directory in the base directory.
    pub sessions: Vec<SessionDirectory>,
    /// Backups, newest first.
    pub backups: Vec<BackupEntry>,
    /// Recorded policy state.
    pub policy: Option<PolicyState>,
    /// Whether the identity differs from the recorded policy state.
    pub policy_changed: bool,
    /// Overall verdict.
    pub health: Health,
    /// Suggested operator actions.
    pub recommendations: Vec<String>,
    /// Sections that could not be collected.
    pub errors: Vec<String>,
}

impl DiagnosticsReport {
    /// Human-readable multi-line rendering.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "health:     {:?}", self.health);
        let _ = writeln!(out, "identity:   {}", self.identity);
        let _ = writeln!(out, "session:    {}", self.session_path.display());
        let _ = writeln!(
            out,
            "validation: {} ({} issues, {} warnings, {} bytes)",
            if self.validation.is_valid { "valid" } else { "invalid" },
            self.validation.issues.len(),
            self.validation.warnings.len(),
            self.validation.total_size_bytes
        );
        match &self.lock {
            Some(lock) => {
                let owner = lock
                    .record
                    .as_ref()
                    .map_or_else(|| "unknown".to_owned(), |r| r.owner_pid().to_string());
                let _ = writeln!(
                    out,
                    "lock:       pid {owner}, alive={}, stale={}, age={}ms",
                    lock.owner_alive, lock.is_stale, lock.age_ms
                );
            }
            None => {
                let _ = writeln!(out, "lock:       none");
            }
        }
        let _ = writeln!(out, "sessions:   {}", self.sessions.len());
        for session in &self.sessions {
            let _ = writeln!(
                out,
                "  {} files={} bytes={} valid={} auth={}",
                session.path.display(),
                session.file_count,
                session.size_bytes,
                session.structurally_valid,
                session.has_auth_data
            );
        }
        let _ = writeln!(out, "backups:    {}", self.backups.len());
        for item in &self.recommendations {
            let _ = writeln!(out, "- {item}");
        }
        for err in &self.errors {
            let _ = writeln!(out, "! {err}");
        }
        out
    }
}

/// Composes a [`DiagnosticsReport`] without mutating anything.
pub struct DiagnosticsReporter<'a> {
    resolver: &'a IdentityResolver,
    locks: &'a LockFileManager,
    store: &'a SessionStore,
    lock_path: PathBuf,
    stale_after: Duration,
}

impl<'a> DiagnosticsReporter<'a> {
    /// Reporter over existing components.
    #[must_use]
    pub fn new(
        resolver: &'a IdentityResolver,
        locks: &'a LockFileManager,
        store: &'a SessionStore,
        lock_path: PathBuf,
        stale_after: Duration,
    ) -> Self {
        Self {
            resolver,
            locks,
            store,
            lock_path,
            stale_after,
        }
    }

    /// Collect the report. Failing sections are listed in `errors`.
    pub async fn report(&self, options: &ResolveOptions) -> DiagnosticsReport {
        let mut errors = Vec::new();

        let identity = self.resolver.resolve(options).await;
        let session_path = self.store.session_path(&identity.id);

        let lock = self
            .locks
            .get_lock_info(&self.lock_path, self.stale_after)
            .await
            .unwrap_or_else(|err| {
                errors.push(format!("lock: {err}"));
                None
            });
        let validation = self.store.validator().validate(&session_path).await;
        let severity = assess_severity(&validation);
        let sessions = self.store.list_sessions().await.unwrap_or_else(|err| {
            errors.push(format!("sessions: {err}"));
            Vec::new()
        });
        let backups = self.store.backups().list().await.unwrap_or_else(|err| {
            errors.push(format!("backups: {err}"));
            Vec::new()
        });
        let policy = self.store.policy().load().await.unwrap_or_else(|err| {
            errors.push(format!("policy: {err}"));
            None
        });
        let policy_changed = policy.as_ref().is_some_and(|p| p.differs_from(&identity));

        let mut report = DiagnosticsReport {
            generated_at: Utc::now(),
            identity,
            session_path,
            lock,
            validation,
            severity,
            sessions,
            backups,
            policy,
            policy_changed,
            health: Health::Healthy,
            recommendations: Vec::new(),
            errors,
        };
        let (health, recommendations) = assess_health(&report);
        report.health = health;
        report.recommendations = recommendations;
        report
    }
}

/// Verdict and recommendations for a collected report.
#[must_use]
pub fn assess_health(report: &DiagnosticsReport) -> (Health, Vec<String>) {
    let mut health = Health::Healthy;
    let mut recommendations = Vec::new();

    if let Some(lock) = &report.lock {
        if lock.record.is_none() {
            health = health.max(Health::Unhealthy);
            recommendations.push("lock file is unreadable; it will be replaced on next start".into());
        } else if !lock.owner_alive {
            health = health.max(Health::Degraded);
            recommendations.push(
                "lock owner is gone; the stale lock is removed on next start or with `release`"
                    .into(),
            );
        } else if lock.is_stale {
            health = health.max(Health::Unhealthy);
            recommendations
                .push("lock owner is alive but has stopped refreshing its lock; check the process".into());
        }
    }

    if report.validation.exists {
        match report.severity {
            Severity::None => {}
            Severity::Minor => {
                health = health.max(Health::Degraded);
                recommendations.push("run `recover` to prune stale artifacts".into());
            }
            Severity::Major => {
                health = health.max(Health::Unhealthy);
                recommendations.push("session is missing required data; run `recover`".into());
            }
            Severity::Critical => {
                health = health.max(Health::Unhealthy);
                recommendations
                    .push("session is unusable; `recover` will reset it and require re-authentication".into());
            }
        }
    } else if report.sessions.is_empty() {
        recommendations.push("no session yet; the client will authenticate on first start".into());
    }

    if report.identity.is_shared() && report.sessions.len() > 1 {
        health = health.max(Health::Degraded);
        recommendations.push(format!(
            "{} session directories found; run `consolidate`",
            report.sessions.len()
        ));
    }

    if report.policy_changed && !report.validation.exists {
        health = health.max(Health::Degraded);
        recommendations.push("identity changed since the last start; run `migrate`".into());
    }

    if !report.errors.is_empty() {
        health = health.max(Health::Degraded);
    }

    (health, recommendations)
}
