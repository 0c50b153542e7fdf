//! Error types for the sync engine

use thiserror::Error;

/// Result type alias using the sync engine's error
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Errors that can occur during sync operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// Storage error from the local record store
    #[error("Storage error: {0}")]
    Store(#[from] waymark_core::Error),

    /// HTTP transport failure (connect, timeout, TLS)
    #[error("Sync HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status from the remote service
    #[error("Sync API error ({status}): {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Parsed server message
        message: String,
    },

    /// A pulled record that does not match the expected wire shape
    #[error("Invalid observation payload: {0}")]
    InvalidPayload(String),

    /// Invalid sync configuration
    #[error("Invalid sync configuration: {0}")]
    InvalidConfiguration(String),

    /// Sync was cancelled
    #[error("Sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// True when the external scheduler may retry the operation as-is.
    ///
    /// Transport failures and server-side (5xx) statuses are transient;
    /// validation (4xx) statuses and malformed payloads are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP status code carried by this error, when there is one.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
