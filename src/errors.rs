//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure, or missing host info.
    Config(String),
    /// A live process owns the lock file.
    Contention(String),
    /// An existing session directory failed validation.
    Corruption(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Session migration or consolidation failure.
    Migration(String),
    /// Automatic session repair failure.
    Recovery(String),
    /// Requested entity does not exist.
    NotFound(String),
}

impl AppError {
    /// Stable machine-readable code for structured output.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "configuration_error",
            Self::Contention(_) => "contention_error",
            Self::Corruption(_) => "corruption_error",
            Self::Io(_) => "io_error",
            Self::Migration(_) => "migration_error",
            Self::Recovery(_) => "recovery_error",
            Self::NotFound(_) => "not_found",
        }
    }

    /// Process exit code used by the binaries when this error is fatal.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Contention(_) => 3,
            _ => 1,
        }
    }

    /// Whether a retry loop may try again after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Contention(msg) => write!(f, "contention: {msg}"),
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Migration(msg) => write!(f, "migration: {msg}"),
            Self::Recovery(msg) => write!(f, "recovery: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Io(format!("json: {err}"))
    }
}
