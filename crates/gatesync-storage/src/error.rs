//! Storage error types for the backing-store repositories.

/// Errors that can occur while querying the backing store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to reach the backing store.
    #[error("Connection error: {message}")]
    ConnectionError {
        /// Description of the connection error.
        message: String,
    },

    /// The backing store did not answer in time.
    #[error("Timeout: {message}")]
    Timeout {
        /// Description of the timed-out operation.
        message: String,
    },

    /// The query criteria were rejected.
    #[error("Invalid criteria: {message}")]
    InvalidCriteria {
        /// Why the criteria are invalid.
        message: String,
    },

    /// Fixture or record could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal storage error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StorageError {
    /// Creates a new `ConnectionError` error.
    #[must_use]
    pub fn connection_error(message: impl Into<String>) -> Self {
        Self::ConnectionError {
            message: message.into(),
        }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidCriteria` error.
    #[must_use]
    pub fn invalid_criteria(message: impl Into<String>) -> Self {
        Self::InvalidCriteria {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` for failures a later attempt may not hit again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionError { .. } | Self::Timeout { .. })
    }
}

/// Result type for repository operations.
pub type StorageResult<T> = Result<T, StorageError>;
