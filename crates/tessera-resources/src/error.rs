//! Error types for resource operations

use tessera_core::StorageError;
use thiserror::Error;

use crate::reference::BlockingReference;

/// Errors surfaced by [`crate::ResourceConsistencyGuard`]
#[derive(Debug, Error)]
pub enum ResourceError {
    /// Another resource already occupies the name
    #[error("Resource already exists: {0}")]
    NameConflict(String),

    /// Deleting would break live references; nothing was deleted
    #[error("{target} is still referenced by {count} holder(s)", count = .references.len())]
    ReferentialIntegrity {
        target: String,
        references: Vec<BlockingReference>,
    },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid resource name: {0}")]
    InvalidName(String),

    #[error("Full name {name} is longer than {max} characters")]
    FullNameTooLong { name: String, max: usize },

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The backend cannot move a directory together with its children
    #[error("Directories cannot be renamed on this backend: {0}")]
    DirectoryRenameUnsupported(String),

    #[error("Directories cannot be downloaded: {0}")]
    DirectoryDownload(String),

    /// A write-class storage call reported failure
    #[error("Storage operation `{operation}` failed for {key}")]
    OperationFailed {
        operation: &'static str,
        key: String,
    },

    /// Storage changes were committed but a follow-up step did not complete
    #[error("Committed {committed} storage change(s) but follow-up failed: {reason}")]
    PartialCommit { committed: usize, reason: String },

    #[error("Reference index error: {0}")]
    ReferenceIndex(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ResourceError {
    pub(crate) fn failed(operation: &'static str, key: impl Into<String>) -> Self {
        Self::OperationFailed {
            operation,
            key: key.into(),
        }
    }

    /// Map a storage `NotFound` for `key` onto the resource-level variant
    pub(crate) fn from_lookup(key: &str, err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => Self::NotFound(key.to_string()),
            other => Self::Storage(other),
        }
    }
}
