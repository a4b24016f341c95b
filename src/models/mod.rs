//! Domain model module declarations.

pub mod identity;
pub mod lock;
pub mod migration;
pub mod recovery;
pub mod session;
pub mod validation;
