//! Error types for the SelfSync service.

use thiserror::Error;

/// Main error type for SelfSync operations.
#[derive(Error, Debug)]
pub enum SelfSyncError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid rate limit settings, rejected when a limiter is registered
    #[error("Rate limit error: {0}")]
    RateLimit(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for SelfSyncError {
    fn from(err: config::ConfigError) -> Self {
        SelfSyncError::Config(err.to_string())
    }
}

/// Result type alias for SelfSync operations.
pub type Result<T> = std::result::Result<T, SelfSyncError>;
