//! Error types for storage operations

use thiserror::Error;

/// Errors that can occur while talking to a storage backend
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend cannot be used with the supplied settings (missing bucket, bad root)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Key, directory or object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote service rejected or failed a request
    #[error("Backend service error: {0}")]
    Service(String),

    /// Local filesystem failure
    #[error("I/O error: {0}")]
    Io(String),

    /// A long-running listing was cancelled by its caller
    #[error("Listing cancelled under {0}")]
    Cancelled(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The backend client was already released
    #[error("Backend has been shut down")]
    ShutDown,
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(err.to_string()),
            _ => StorageError::Io(err.to_string()),
        }
    }
}

impl StorageError {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a not-found error for a key
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    /// Create a backend service error
    pub fn service(msg: impl Into<String>) -> Self {
        Self::Service(msg.into())
    }

    /// True when the error means the addressed key is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
