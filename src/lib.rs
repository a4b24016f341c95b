#![forbid(unsafe_code)]

//! Single-host ownership, validation and migration of persisted
//! automation sessions.

pub mod audit;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod fs_ops;
pub mod identity;
pub mod lock;
pub mod models;
pub mod orchestrator;
pub mod session;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
