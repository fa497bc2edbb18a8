//! State management with actor pattern.
//!
//! `StateManager` owns a workspace's `store::Store` and processes commands
//! via a channel, so every mutation is serialized through one task.

mod manager;
mod messages;

pub use manager::{StateEvent, StateManager};
pub use messages::{GlobalCounts, PhaseAgentCounts, StateCommand, StateError, StateResult, TaskCounts};
