//! Candidate ranking shared by consolidation and migration.
//!
//! Each candidate scores `0.4 * recency + 0.3 * files + 0.3 * size`, every
//! term normalized to `[0, 1]` against a fixed cap.

use std::cmp::Ordering;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use super::naming::file_name_of;
use super::validator::SessionValidator;
use crate::fs_ops::dir_stats;

/// Age at which the recency term reaches zero.
pub const RECENCY_HORIZON_SECS: f64 = 30.0 * 24.0 * 3600.0;
/// File count at which the file term saturates.
pub const FILE_COUNT_CAP: f64 = 1000.0;
/// Size at which the size term saturates.
pub const SIZE_CAP_BYTES: f64 = 100.0 * 1024.0 * 1024.0;

const RECENCY_WEIGHT: f64 = 0.4;
const FILES_WEIGHT: f64 = 0.3;
const SIZE_WEIGHT: f64 = 0.3;

/// Inputs for scoring one session directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Directory path.
    pub path: PathBuf,
    /// Regular files in the tree.
    pub file_count: u64,
    /// Total size of regular files.
    pub size_bytes: u64,
    /// Newest file modification time.
    pub last_modified: Option<DateTime<Utc>>,
}

#[allow(clippy::cast_precision_loss)]
fn ratio(value: u64, cap: f64) -> f64 {
    (value as f64 / cap).clamp(0.0, 1.0)
}

/// Weighted score of `candidate` as of `now`.
#[must_use]
pub fn score(candidate: &Candidate, now: DateTime<Utc>) -> f64 {
    let recency = candidate.last_modified.map_or(0.0, |modified| {
        #[allow(clippy::cast_precision_loss)]
        let age = (now - modified).num_seconds().max(0) as f64;
        (1.0 - age / RECENCY_HORIZON_SECS).clamp(0.0, 1.0)
    });
    RECENCY_WEIGHT * recency
        + FILES_WEIGHT * ratio(candidate.file_count, FILE_COUNT_CAP)
        + SIZE_WEIGHT * ratio(candidate.size_bytes, SIZE_CAP_BYTES)
}

/// Candidates ordered best first.
///
/// Equal scores prefer the directory named `preferred`, then sort by name.
#[must_use]
pub fn rank(candidates: Vec<Candidate>, preferred: &str, now: DateTime<Utc>) -> Vec<(f64, Candidate)> {
    let mut scored: Vec<_> = candidates
        .into_iter()
        .map(|candidate| (score(&candidate, now), candidate))
        .collect();
    scored.sort_by(|(left_score, left), (right_score, right)| {
        right_score
            .total_cmp(left_score)
            .then_with(|| {
                let left_preferred = file_name_of(&left.path) == preferred;
                let right_preferred = file_name_of(&right.path) == preferred;
                match (left_preferred, right_preferred) {
                    (true, false) => Ordering::Less,
                    (false, true) => Ordering::Greater,
                    _ => Ordering::Equal,
                }
            })
            .then_with(|| left.path.cmp(&right.path))
    });
    scored
}

/// Statistics of every non-empty, structurally valid directory in `paths`.
///
/// Directories that cannot be scanned are reported in `errors` and skipped.
pub(crate) async fn collect_candidates(
    validator: &SessionValidator,
    paths: &[PathBuf],
    errors: &mut Vec<String>,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for path in paths {
        let stats = match dir_stats(path).await {
            Ok(stats) => stats,
            Err(err) => {
                errors.push(format!("{}: {err}", path.display()));
                continue;
            }
        };
        if stats.file_count == 0 || !validator.quick_validate(path).await {
            continue;
        }
        candidates.push(Candidate {
            path: path.clone(),
            file_count: stats.file_count,
            size_bytes: stats.size_bytes,
            last_modified: stats.last_modified,
        });
    }
    candidates
}
