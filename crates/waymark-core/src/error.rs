//! Error types for waymark-core

use thiserror::Error;

/// Result type alias using waymark-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in waymark-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed geometry value
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),
}
