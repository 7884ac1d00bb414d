//! Error types for strata-core.

use crate::parser::ParseError;
use std::path::PathBuf;
use strata_sandbox::SandboxError;
use strata_store::{BuildId, BuildKey, StoreError};
use thiserror::Error;

/// Result type alias for strata-core operations.
pub type Result<T> = std::result::Result<T, BuildError>;

/// Errors that can occur while building or removing images.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Error from the storage layer
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Error from the sandbox protocol
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    /// A FROM chain leads back to a key already being built
    #[error("dependency cycle detected at {0}")]
    DependencyCycle(BuildKey),

    /// Resolved base cannot be used as a clone source
    #[error("build {0} is not cloneable")]
    NotCloneable(BuildId),

    /// Descriptor has commands but does not start with FROM
    #[error("{0}: first command must be FROM")]
    MissingFromCommand(String),

    /// FROM appears after the first command
    #[error("FROM {0} is only allowed as the first command")]
    MisplacedFrom(BuildKey),

    /// Base descriptor does not declare exactly one tag
    #[error("base image {name} must have exactly one tag, found {count}")]
    BaseTagCount {
        /// Descriptor name
        name: String,
        /// Number of tags declared
        count: usize,
    },

    /// Spec file could not be parsed
    #[error("{}: {source}", .path.display())]
    Parse {
        /// File being parsed
        path: PathBuf,
        /// Line-level error
        #[source]
        source: ParseError,
    },

    /// Invalid builder configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Build was cancelled
    #[error("build cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// Check if this error reports an absent build or key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BuildError::Store(e) if e.is_not_found())
    }

    /// Check if this error was caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            BuildError::Cancelled | BuildError::Sandbox(SandboxError::Cancelled)
        )
    }
}
