//! Error types for the container runtime adapter.

use thiserror::Error;

/// Result type alias for runtime adapter operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The named container does not exist.
    #[error("container '{0}' not found")]
    NotFound(String),

    /// The CLI ran and exited non-zero. `output` carries its combined output.
    #[error("{operation} '{target}' failed: {output}")]
    Command {
        operation: &'static str,
        target: String,
        output: String,
    },

    #[error("{operation} '{target}' timed out after {secs}s")]
    Timeout {
        operation: &'static str,
        target: String,
        secs: u64,
    },

    /// The CLI binary could not be executed at all.
    #[error("failed to spawn '{binary}': {reason}")]
    Spawn { binary: String, reason: String },

    #[error("unexpected runtime output: {0}")]
    Parse(String),
}
