//! Error types for scheduler operations.

use thiserror::Error;

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `finish` was requested while a worker is still inside the work item.
    #[error("work `{0}` is executing and cannot be finished")]
    FinishWhileExecuting(String),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    SpawnFailed(String),
}

/// Application-facing result using anyhow for higher-level contexts.
///
/// Work payloads return this; an `Err` becomes the item's terminal failure.
pub type AppResult<T> = Result<T, anyhow::Error>;
