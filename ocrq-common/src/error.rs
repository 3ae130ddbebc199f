//! Common error types for OCRQ

use thiserror::Error;

/// Common result type for OCRQ operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across OCRQ services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// External dependency temporarily unreachable (retryable)
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error class is expected to clear on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Io(_) | Error::Unavailable(_))
    }
}
