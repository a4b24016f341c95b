//! Identity id sanitization.

use sha2::{Digest, Sha256};

/// Id used when nothing usable survives sanitization.
pub const DEFAULT_ID: &str = "default";

/// Hex characters of the collision-avoidance suffix.
const HASH_SUFFIX_LEN: usize = 8;

/// Turn an arbitrary name into a filesystem-safe identity id.
///
/// Lowercases, replaces every character outside `[a-z0-9._-]` with `-`,
/// collapses dash runs, and trims leading/trailing `-` and `.`. Names longer
/// than `max_len` are cut and suffixed with a short hash of the full cleaned
/// name so distinct long names stay distinct. The function is idempotent.
#[must_use]
pub fn sanitize_id(raw: &str, max_len: usize) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        let mapped = if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            c
        } else {
            '-'
        };
        if mapped == '-' && cleaned.ends_with('-') {
            continue;
        }
        cleaned.push(mapped);
    }

    let trimmed = cleaned.trim_matches(|c| c == '-' || c == '.');
    if trimmed.is_empty() {
        return DEFAULT_ID.to_owned();
    }

    let max_len = max_len.max(HASH_SUFFIX_LEN + 2);
    if trimmed.len() <= max_len {
        return trimmed.to_owned();
    }

    let digest = Sha256::digest(trimmed.as_bytes());
    let suffix: String = format!("{digest:x}").chars().take(HASH_SUFFIX_LEN).collect();
    // Every remaining character is ASCII, so byte slicing is safe.
    let keep = max_len - HASH_SUFFIX_LEN - 1;
    let head = trimmed[..keep].trim_end_matches(|c| c == '-' || c == '.');
    format!("{head}-{suffix}")
}
