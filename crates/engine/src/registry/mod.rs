//! In-memory task and attempt registries
//!
//! This module provides:
//! - [`TaskRegistry`] - task id → execution metadata (work, arguments, status, attempts)
//! - [`AttemptRegistry`] - attempt id → liveness metadata (last heartbeat, info)
//!
//! Each registry is guarded by its own lock and every method takes that lock exactly
//! once. Operations that touch both registries always lock tasks before attempts.

mod attempt;
mod task;

pub use attempt::{Attempt, AttemptRegistry};
pub use task::{Task, TaskRegistry, TaskStatus};

/// Error type for registry lookups
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Task not found
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// Attempt not found
    #[error("attempt not found: {0}")]
    AttemptNotFound(String),

    /// A task with this id is still live
    #[error("task is still live: {0}")]
    TaskLive(String),
}
