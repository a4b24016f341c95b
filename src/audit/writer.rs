//! Append-only JSONL audit trail shared by every process on a base directory.
//!
//! Each entry opens `<log_dir>/session-audit-YYYY-MM-DD.jsonl` in append
//! mode and lands as one `write` of a complete line, so concurrent
//! workers interleave whole entries and a new UTC day starts a new file
//! without any rotation state.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::{NaiveDate, Utc};

use super::{AuditEntry, AuditLogger};
use crate::{AppError, Result};

/// Daily JSONL audit file writer.
#[derive(Debug, Clone)]
pub struct JsonlAuditWriter {
    log_dir: PathBuf,
}

impl JsonlAuditWriter {
    /// Writer over `log_dir`, created with its parents when missing.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory cannot be created.
    pub fn new(log_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&log_dir).map_err(|err| {
            AppError::Io(format!("cannot create audit dir {}: {err}", log_dir.display()))
        })?;
        Ok(Self { log_dir })
    }

    /// Path of the file written for `date`.
    #[must_use]
    pub fn path_for_date(&self, date: NaiveDate) -> PathBuf {
        self.log_dir.join(format!("session-audit-{date}.jsonl"))
    }

    fn append_line(&self, date: NaiveDate, line: &[u8]) -> Result<()> {
        let path = self.path_for_date(date);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| AppError::Io(format!("cannot open {}: {err}", path.display())))?;
        file.write_all(line)
            .map_err(|err| AppError::Io(format!("cannot append to {}: {err}", path.display())))
    }
}

impl AuditLogger for JsonlAuditWriter {
    fn log_entry(&self, entry: AuditEntry) -> Result<()> {
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        self.append_line(Utc::now().date_naive(), &line)
    }
}
