//! Error types for schema synchronization.

use oxide_spanner::DdlError;

/// Errors that can occur while synchronizing a Spanner schema.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Transformation, parsing, reference or generation failure.
    #[error(transparent)]
    Ddl(#[from] DdlError),

    /// The database client rejected a call.
    #[error("Client error during {operation}: {message}")]
    Client {
        /// Client operation that failed.
        operation: String,
        /// Error message.
        message: String,
    },

    /// A row does not fit its table.
    #[error("Invalid row for table '{table}': {message}")]
    InvalidRow {
        /// Table name.
        table: String,
        /// What is wrong with the row.
        message: String,
    },

    /// IO error (reading dumps, ASTs or entity files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Builds a [`SyncError::Client`].
    #[must_use]
    pub fn client(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Client {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Builds a [`SyncError::InvalidRow`].
    #[must_use]
    pub fn invalid_row(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRow {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Returns true when the error is a dangling reference.
    #[must_use]
    pub const fn is_dangling_reference(&self) -> bool {
        matches!(self, Self::Ddl(err) if err.is_dangling_reference())
    }
}

/// Result type for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;
