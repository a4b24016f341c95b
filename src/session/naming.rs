//! Session directory naming convention: `<prefix>_<instance id>`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::{AppError, Result};

/// Infix of directories set aside while a session is replaced.
const SET_ASIDE_MARKER: &str = ".superseded-";

/// Maps identity ids to directory names and back.
#[derive(Debug, Clone)]
pub struct SessionNaming {
    prefix: String,
    pattern: Regex,
}

impl SessionNaming {
    /// Naming for directories called `<prefix>_<id>`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the prefix yields an invalid pattern.
    pub fn new(prefix: &str) -> Result<Self> {
        let pattern = Regex::new(&format!(r"^{}_([a-z0-9._-]+)$", regex::escape(prefix)))
            .map_err(|err| AppError::Config(format!("invalid session prefix: {err}")))?;
        Ok(Self {
            prefix: prefix.to_owned(),
            pattern,
        })
    }

    /// Directory prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Directory name for `instance_id`.
    #[must_use]
    pub fn dir_name(&self, instance_id: &str) -> String {
        format!("{}_{instance_id}", self.prefix)
    }

    /// Session path for `instance_id` under `base_dir`.
    #[must_use]
    pub fn session_path(&self, base_dir: &Path, instance_id: &str) -> PathBuf {
        base_dir.join(self.dir_name(instance_id))
    }

    /// Sibling path a replaced session is moved to, outside discovery.
    #[must_use]
    pub fn set_aside_path(&self, session_path: &Path, stamp: &str) -> PathBuf {
        session_path.with_file_name(format!(
            "{}{SET_ASIDE_MARKER}{stamp}",
            file_name_of(session_path)
        ))
    }

    /// Identity id encoded in a directory name, if it follows the convention.
    ///
    /// Set-aside directories never count.
    #[must_use]
    pub fn instance_id_of<'a>(&self, dir_name: &'a str) -> Option<&'a str> {
        if dir_name.contains(SET_ASIDE_MARKER) {
            return None;
        }
        self.pattern
            .captures(dir_name)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }

    /// Every directory under `base_dir` following the convention, by name.
    ///
    /// A missing base directory yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if `base_dir` exists but cannot be listed.
    pub async fn discover(&self, base_dir: &Path) -> Result<Vec<PathBuf>> {
        let mut reader = match tokio::fs::read_dir(base_dir).await {
            Ok(reader) => reader,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(AppError::Io(format!(
                    "failed to list {}: {err}",
                    base_dir.display()
                )))
            }
        };

        let mut found = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|err| {
            AppError::Io(format!("failed to list {}: {err}", base_dir.display()))
        })? {
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if name
                .to_str()
                .is_some_and(|name| self.instance_id_of(name).is_some())
            {
                found.push(entry.path());
            }
        }
        found.sort();
        Ok(found)
    }
}

/// File name of `path` as UTF-8, or empty.
pub(crate) fn file_name_of(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}
