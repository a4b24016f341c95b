//! Process-level orchestration: the startup flow and client events.

pub mod coordinator;
pub mod events;
