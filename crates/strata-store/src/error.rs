//! Error types for strata-store.

use crate::id::{BuildId, BuildKey};
use thiserror::Error;

/// Result type alias for strata-store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during identity parsing and storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Image name does not match the naming pattern
    #[error("invalid image name: {0:?}")]
    InvalidName(String),

    /// Tag does not match the tag pattern
    #[error("invalid tag: {0:?}")]
    InvalidTag(String),

    /// String is not a well-formed build ID (bad shape or checksum)
    #[error("invalid build ID: {0:?}")]
    InvalidBuildId(String),

    /// No stored build has this ID
    #[error("build not found: {0}")]
    NotFound(BuildId),

    /// No stored build carries this key
    #[error("no build tagged {0}")]
    KeyNotFound(BuildKey),

    /// Clone source has no sealed snapshot
    #[error("clone source {0} has no finalized snapshot")]
    SourceNotFound(BuildId),

    /// Build is still the copy-on-write parent of other layers
    #[error("build {id} still has {count} dependent layer(s)")]
    HasChildren {
        /// Build that was asked to be dropped
        id: BuildId,
        /// Number of live layers cloned from it
        count: usize,
    },

    /// Layer directory already exists for a freshly generated ID
    #[error("layer already exists: {0}")]
    AlreadyExists(BuildId),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest or layer metadata could not be (de)serialized
    #[error("metadata error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Check if this error reports an absent build or key.
    ///
    /// Base resolution branches on this; every other error propagates.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_) | StoreError::KeyNotFound(_))
    }
}
