//! Error types for crest-rs.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when building or using a crest pool.
#[derive(Debug, Error)]
pub enum CrestError {
    /// A constructor argument failed validation. Fatal; never retried.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error extracting configuration from figment.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Queue admission exceeded the submission timeout. Caller may retry.
    #[error("submission timed out after {0:?}: queue full")]
    SubmissionTimeout(Duration),

    /// A single task panicked. Isolated to its item; sibling tasks are
    /// unaffected.
    #[error("task panicked: {0}")]
    Task(String),

    /// A queued task was cancelled before a worker claimed it.
    #[error("task cancelled before it started")]
    Cancelled,

    /// The pool is no longer accepting submissions.
    #[error("pool is shut down")]
    PoolClosed,

    /// Failed to spawn a worker or monitor thread.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// A worker's execution harness crashed. Fatal to the whole pool:
    /// all pending and future submissions fail.
    #[error("worker harness crashed; pool is failed")]
    PoolFailure,
}

impl CrestError {
    /// Whether this error condemns the whole pool rather than a single task.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CrestError::InvalidConfig(_)
                | CrestError::Config(_)
                | CrestError::Spawn(_)
                | CrestError::PoolFailure
        )
    }
}

/// Result type alias for crest operations.
pub type Result<T> = std::result::Result<T, CrestError>;
