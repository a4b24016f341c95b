//! Structured logging interface injected into every component.
//!
//! Components never call `tracing` directly for domain events; they hand an
//! [`AuditEntry`] to an [`AuditLogger`]. The default implementation,
//! [`TracingAuditLogger`], forwards to `tracing`. [`JsonlAuditWriter`]
//! appends JSONL records to daily-rotating files, and [`MemoryAuditLog`]
//! keeps entries in memory so tests can assert on them.

pub mod writer;

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Severity of an audit entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal lifecycle event.
    Info,
    /// Degraded but handled.
    Warn,
    /// Operation failed.
    Error,
}

/// A structured record of a coordination event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// ISO 8601 timestamp with timezone.
    pub timestamp: DateTime<Utc>,
    /// Entry severity.
    pub level: AuditLevel,
    /// Emitting component (`identity`, `lock`, `validator`, ...).
    pub component: String,
    /// Short event message.
    pub message: String,
    /// Structured fields.
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl AuditEntry {
    /// Construct an entry without fields.
    #[must_use]
    pub fn new(level: AuditLevel, component: &str, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component: component.to_owned(),
            message: message.into(),
            fields: serde_json::Map::new(),
        }
    }

    /// Attach a structured field.
    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.to_owned(), value.into());
        self
    }

    /// Look up a field by key.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }
}

/// Writes structured audit entries to a sink.
///
/// Implementations must be [`Send`] and [`Sync`] to allow sharing across
/// async task boundaries via [`std::sync::Arc`].
pub trait AuditLogger: Send + Sync {
    /// Record a single audit entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write operation fails.
    fn log_entry(&self, entry: AuditEntry) -> crate::Result<()>;
}

/// Shared handle to an injected logger.
pub type SharedLogger = Arc<dyn AuditLogger>;

/// Record `entry`, swallowing sink failures.
///
/// Logging is advisory and must never change control flow.
pub fn emit(logger: &dyn AuditLogger, entry: AuditEntry) {
    if let Err(err) = logger.log_entry(entry) {
        warn!(%err, "audit logger rejected entry");
    }
}

/// Forwards entries to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLogger;

impl AuditLogger for TracingAuditLogger {
    fn log_entry(&self, entry: AuditEntry) -> crate::Result<()> {
        let fields = serde_json::Value::Object(entry.fields);
        let component = entry.component.as_str();
        match entry.level {
            AuditLevel::Debug => {
                tracing::debug!(component, %fields, "{}", entry.message);
            }
            AuditLevel::Info => {
                tracing::info!(component, %fields, "{}", entry.message);
            }
            AuditLevel::Warn => {
                tracing::warn!(component, %fields, "{}", entry.message);
            }
            AuditLevel::Error => {
                tracing::error!(component, %fields, "{}", entry.message);
            }
        }
        Ok(())
    }
}

/// Sends every entry to each inner logger.
pub struct FanoutAuditLogger {
    sinks: Vec<SharedLogger>,
}

impl FanoutAuditLogger {
    /// Construct from a list of sinks.
    #[must_use]
    pub fn new(sinks: Vec<SharedLogger>) -> Self {
        Self { sinks }
    }
}

impl AuditLogger for FanoutAuditLogger {
    fn log_entry(&self, entry: AuditEntry) -> crate::Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(err) = sink.log_entry(entry.clone()) {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Keeps entries in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    /// Construct an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every entry recorded so far.
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Whether an entry from `component` with exactly `message` was recorded.
    #[must_use]
    pub fn contains(&self, component: &str, message: &str) -> bool {
        self.entries()
            .iter()
            .any(|e| e.component == component && e.message == message)
    }

    /// Entries at `level` or above.
    #[must_use]
    pub fn at_least(&self, level: AuditLevel) -> Vec<AuditEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.level >= level)
            .collect()
    }
}

impl AuditLogger for MemoryAuditLog {
    fn log_entry(&self, entry: AuditEntry) -> crate::Result<()> {
        self.entries
            .lock()
            .map_err(|_| crate::AppError::Io("memory audit log mutex poisoned".into()))?
            .push(entry);
        Ok(())
    }
}

pub use writer::JsonlAuditWriter;

/// Logger used by the binaries: `tracing`, plus a JSONL file when
/// `audit_log_dir` is set.
///
/// # Errors
///
/// Returns `AppError::Io` if the audit directory cannot be created.
pub fn build_logger(audit_log_dir: Option<&std::path::Path>) -> crate::Result<SharedLogger> {
    let tracing_sink: SharedLogger = Arc::new(TracingAuditLogger);
    match audit_log_dir {
        None => Ok(tracing_sink),
        Some(dir) => {
            let writer: SharedLogger = Arc::new(JsonlAuditWriter::new(dir.to_path_buf())?);
            Ok(Arc::new(FanoutAuditLogger::new(vec![tracing_sink, writer])))
        }
    }
}
