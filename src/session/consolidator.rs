//! Reconciles duplicate session directories down to the current identity.
//!
//! The best candidate is renamed onto the target path and every other
//! directory under the naming convention is deleted. Failures on one
//! directory are collected and never abort the rest.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use crate::audit::{emit, AuditEntry, AuditLevel, SharedLogger};
use crate::fs_ops::{exists, move_dir, remove_dir_if_exists, MoveKind};
use crate::models::migration::{ConsolidationAction, ConsolidationResult};

use super::naming::SessionNaming;
use super::scoring::{collect_candidates, rank};
use super::validator::SessionValidator;

/// Consolidates session directories in a base directory.
pub struct SessionConsolidator {
    naming: SessionNaming,
    validator: Arc<SessionValidator>,
    logger: SharedLogger,
}

impl SessionConsolidator {
    /// Construct a consolidator.
    #[must_use]
    pub fn new(naming: SessionNaming, validator: Arc<SessionValidator>, logger: SharedLogger) -> Self {
        Self {
            naming,
            validator,
            logger,
        }
    }

    /// Reduce the session directories under `base_dir` to the one for `target_id`.
    ///
    /// With no non-empty, structurally valid candidate nothing is touched.
    pub async fn consolidate(&self, base_dir: &Path, target_id: &str) -> ConsolidationResult {
        let target = self.naming.session_path(base_dir, target_id);
        let target_name = self.naming.dir_name(target_id);

        let sources = match self.naming.discover(base_dir).await {
            Ok(sources) => sources,
            Err(err) => {
                let mut result =
                    ConsolidationResult::noop(ConsolidationAction::NothingFound, Vec::new(), target);
                result.errors.push(err.to_string());
                return result;
            }
        };

        if sources.is_empty() {
            return ConsolidationResult::noop(ConsolidationAction::NothingFound, sources, target);
        }
        if sources.len() == 1 && sources[0] == target {
            return ConsolidationResult::noop(
                ConsolidationAction::AlreadyConsolidated,
                sources,
                target,
            );
        }

        let mut errors = Vec::new();
        let candidates = collect_candidates(&self.validator, &sources, &mut errors).await;
        let Some((score, winner)) = rank(candidates, &target_name, Utc::now()).into_iter().next()
        else {
            self.log(
                AuditEntry::new(AuditLevel::Warn, "consolidator", "no valid candidate, leaving directories untouched")
                    .with_field("candidates", sources.len()),
            );
            let mut result =
                ConsolidationResult::noop(ConsolidationAction::NoValidCandidate, sources, target);
            result.errors = errors;
            return result;
        };

        self.log(
            AuditEntry::new(AuditLevel::Info, "consolidator", "consolidation candidate chosen")
                .with_field("chosen", winner.path.display().to_string())
                .with_field("score", score)
                .with_field("target", target.display().to_string()),
        );

        let mut result = ConsolidationResult {
            action: ConsolidationAction::Consolidated,
            source_paths: sources.clone(),
            chosen_source: Some(winner.path.clone()),
            target_path: target.clone(),
            backup_path: None,
            preserved_count: winner.file_count,
            removed_paths: Vec::new(),
            errors,
        };

        let mut leftovers: Vec<PathBuf> = sources
            .iter()
            .filter(|path| **path != winner.path && **path != target)
            .cloned()
            .collect();

        if winner.path != target {
            match self.replace_target(&winner.path, &target).await {
                Ok(Some(superseded)) => leftovers.push(superseded),
                Ok(None) => {}
                Err(err) => {
                    result.action = ConsolidationAction::Failed;
                    result.errors.push(err);
                    return result;
                }
            }
        }

        for path in leftovers {
            match remove_dir_if_exists(&path).await {
                Ok(()) => {
                    self.log(
                        AuditEntry::new(AuditLevel::Info, "consolidator", "duplicate session removed")
                            .with_field("path", path.display().to_string()),
                    );
                    result.removed_paths.push(path);
                }
                Err(err) => result.errors.push(err.to_string()),
            }
        }

        result
    }

    /// Move `winner` onto `target`, setting an existing target aside first.
    ///
    /// Returns the set-aside path, if any. On failure the set-aside target
    /// is moved back.
    async fn replace_target(
        &self,
        winner: &Path,
        target: &Path,
    ) -> std::result::Result<Option<PathBuf>, String> {
        let superseded = if exists(target).await {
            let stamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
            let aside = self.naming.set_aside_path(target, &stamp);
            tokio::fs::rename(target, &aside).await.map_err(|err| {
                format!("failed to set aside {}: {err}", target.display())
            })?;
            Some(aside)
        } else {
            None
        };

        match move_dir(winner, target).await {
            Ok(kind) => {
                self.log(
                    AuditEntry::new(AuditLevel::Info, "consolidator", "session moved into place")
                        .with_field("from", winner.display().to_string())
                        .with_field("to", target.display().to_string())
                        .with_field("copied", kind == MoveKind::Copied),
                );
                Ok(superseded)
            }
            Err(err) => {
                if let Some(aside) = &superseded {
                    if let Err(restore) = tokio::fs::rename(aside, target).await {
                        self.log(
                            AuditEntry::new(AuditLevel::Error, "consolidator", "failed to restore superseded session")
                                .with_field("path", aside.display().to_string())
                                .with_field("error", restore.to_string()),
                        );
                    }
                }
                Err(err.to_string())
            }
        }
    }

    fn log(&self, entry: AuditEntry) {
        emit(self.logger.as_ref(), entry);
    }
}
