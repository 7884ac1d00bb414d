//! Error types for strata-sandbox.

use thiserror::Error;

/// Result type alias for strata-sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors that can occur while talking to a sandbox.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Unexpected or undecodable message, or the channel closed early
    #[error("sandbox protocol violation: {0}")]
    ProtocolViolation(String),

    /// The sandbox reported a non-empty error for the command
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// Execution was cancelled while waiting on the sandbox
    #[error("sandbox execution cancelled")]
    Cancelled,

    /// Sandbox process could not be started
    #[error("failed to spawn sandbox {program}: {source}")]
    Spawn {
        /// Program that was being started
        program: String,
        /// Underlying spawn error
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error on an outgoing message
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
