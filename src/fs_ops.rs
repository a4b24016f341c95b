//! File-system helpers shared by the lock and session modules.
//!
//! Tree operations are sequential: each copy, rename, or removal is awaited
//! before the next one starts. Symbolic links are never followed.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;

use crate::{AppError, Result};

/// One entry found by [`walk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Full path of the entry.
    pub path: PathBuf,
    /// Directory (not a link to one).
    pub is_dir: bool,
    /// Symbolic link.
    pub is_symlink: bool,
    /// Length in bytes of regular files; zero otherwise.
    pub len: u64,
    /// Modification time of the entry itself.
    pub modified: Option<DateTime<Utc>>,
}

/// Aggregate statistics of a directory tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirStats {
    /// Total size of regular files.
    pub size_bytes: u64,
    /// Number of regular files.
    pub file_count: u64,
    /// Newest modification time among regular files.
    pub last_modified: Option<DateTime<Utc>>,
}

/// How [`move_dir`] relocated a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    /// Single rename.
    Renamed,
    /// Copy, verify, then delete; the rename crossed a device boundary.
    Copied,
}

/// Write `contents` to a temporary sibling of `target` and move it into place.
///
/// With `overwrite == false` an existing `target` is left alone and
/// `Ok(false)` is returned. Parent directories are created as needed.
///
/// # Errors
///
/// Returns `AppError::Io` if the temporary file cannot be written or persisted.
pub fn write_atomic(target: &Path, contents: &str, overwrite: bool) -> Result<bool> {
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|err| {
        AppError::Io(format!(
            "failed to create parent directory {}: {err}",
            parent.display()
        ))
    })?;

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|err| AppError::Io(format!("failed to create temporary file: {err}")))?;
    tmp.write_all(contents.as_bytes())
        .and_then(|()| tmp.flush())
        .map_err(|err| AppError::Io(format!("failed to write temporary file: {err}")))?;

    let persisted = if overwrite {
        tmp.persist(target).map(|_| ())
    } else {
        tmp.persist_noclobber(target).map(|_| ())
    };

    match persisted {
        Ok(()) => Ok(true),
        Err(err) if !overwrite && err.error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(AppError::Io(format!(
            "failed to persist {}: {}",
            target.display(),
            err.error
        ))),
    }
}

/// [`write_atomic`] on the blocking pool.
///
/// # Errors
///
/// Same as [`write_atomic`], plus `AppError::Io` if the task panics.
pub async fn write_atomic_async(target: &Path, contents: String, overwrite: bool) -> Result<bool> {
    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic(&target, &contents, overwrite))
        .await
        .map_err(|err| AppError::Io(format!("write task failed: {err}")))?
}

/// Every entry below `root`, depth first. `root` itself is not included.
///
/// # Errors
///
/// Returns `AppError::Io` if any directory cannot be listed.
pub async fn walk(root: &Path) -> Result<Vec<WalkEntry>> {
    let mut entries = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|err| AppError::Io(format!("failed to list {}: {err}", dir.display())))?;
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|err| AppError::Io(format!("failed to list {}: {err}", dir.display())))?
        {
            let path = entry.path();
            let meta = tokio::fs::symlink_metadata(&path)
                .await
                .map_err(|err| AppError::Io(format!("failed to stat {}: {err}", path.display())))?;
            let file_type = meta.file_type();
            let item = WalkEntry {
                is_dir: file_type.is_dir(),
                is_symlink: file_type.is_symlink(),
                len: if file_type.is_file() { meta.len() } else { 0 },
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
                path,
            };
            if item.is_dir {
                pending.push(item.path.clone());
            }
            entries.push(item);
        }
    }

    Ok(entries)
}

/// Size, file count and newest file time of the tree at `root`.
///
/// # Errors
///
/// Returns `AppError::Io` if the tree cannot be walked.
pub async fn dir_stats(root: &Path) -> Result<DirStats> {
    let mut stats = DirStats::default();
    for entry in walk(root).await? {
        if entry.is_dir || entry.is_symlink {
            continue;
        }
        stats.file_count += 1;
        stats.size_bytes = stats.size_bytes.saturating_add(entry.len);
        stats.last_modified = stats.last_modified.max(entry.modified);
    }
    Ok(stats)
}

/// Whether `path` is a directory with at least one entry.
pub async fn dir_has_entries(path: &Path) -> bool {
    match tokio::fs::read_dir(path).await {
        Ok(mut reader) => matches!(reader.next_entry().await, Ok(Some(_))),
        Err(_) => false,
    }
}

/// Whether anything exists at `path`, links included.
pub async fn exists(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path).await.is_ok()
}

/// Copy the tree at `src` to `dst`, returning the number of files copied.
///
/// `dst` must not exist. Symbolic links are skipped.
///
/// # Errors
///
/// Returns `AppError::Io` on the first failed directory creation or copy.
pub async fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<u64> {
    if exists(dst).await {
        return Err(AppError::Io(format!(
            "copy target {} already exists",
            dst.display()
        )));
    }
    create_dir(dst).await?;

    let mut copied = 0;
    for entry in walk(src).await? {
        if entry.is_symlink {
            continue;
        }
        let relative = entry
            .path
            .strip_prefix(src)
            .map_err(|err| AppError::Io(format!("walk escaped {}: {err}", src.display())))?;
        let target = dst.join(relative);
        if entry.is_dir {
            create_dir(&target).await?;
        } else {
            if let Some(parent) = target.parent() {
                create_dir(parent).await?;
            }
            tokio::fs::copy(&entry.path, &target).await.map_err(|err| {
                AppError::Io(format!(
                    "failed to copy {} to {}: {err}",
                    entry.path.display(),
                    target.display()
                ))
            })?;
            copied += 1;
        }
    }
    Ok(copied)
}

async fn create_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|err| AppError::Io(format!("failed to create {}: {err}", path.display())))
}

/// Remove the tree at `path`; a missing path is not an error.
///
/// # Errors
///
/// Returns `AppError::Io` if removal fails.
pub async fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::Io(format!(
            "failed to remove {}: {err}",
            path.display()
        ))),
    }
}

/// Remove a file or link at `path`; a missing path is not an error.
///
/// # Errors
///
/// Returns `AppError::Io` if removal fails.
pub async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::Io(format!(
            "failed to remove {}: {err}",
            path.display()
        ))),
    }
}

/// Move the directory at `src` to `dst`.
///
/// Uses a single rename. When the rename crosses a device boundary the tree
/// is copied, the copy's file count and size checked against the source,
/// and only then is the source removed.
///
/// # Errors
///
/// Returns `AppError::Io` if the rename fails for another reason, or if the
/// copy fails or does not match. A failed copy is removed again.
pub async fn move_dir(src: &Path, dst: &Path) -> Result<MoveKind> {
    match tokio::fs::rename(src, dst).await {
        Ok(()) => return Ok(MoveKind::Renamed),
        Err(err) if !is_cross_device(&err) => {
            return Err(AppError::Io(format!(
                "failed to rename {} to {}: {err}",
                src.display(),
                dst.display()
            )))
        }
        Err(_) => {}
    }

    let expected = dir_stats(src).await?;
    if let Err(err) = copy_dir_recursive(src, dst).await {
        let _ = remove_dir_if_exists(dst).await;
        return Err(err);
    }
    let actual = dir_stats(dst).await?;
    if actual.file_count != expected.file_count || actual.size_bytes != expected.size_bytes {
        let _ = remove_dir_if_exists(dst).await;
        return Err(AppError::Io(format!(
            "cross-device copy of {} is incomplete ({} of {} files)",
            src.display(),
            actual.file_count,
            expected.file_count
        )));
    }
    remove_dir_if_exists(src).await?;
    Ok(MoveKind::Copied)
}

#[cfg(unix)]
fn is_cross_device(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(nix::errno::Errno::EXDEV as i32)
}

#[cfg(windows)]
fn is_cross_device(err: &std::io::Error) -> bool {
    // ERROR_NOT_SAME_DEVICE
    err.raw_os_error() == Some(17)
}

#[cfg(not(any(unix, windows)))]
fn is_cross_device(_err: &std::io::Error) -> bool {
    false
}
