//! Error types for the Gatekeep service.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Gatekeep operations.
#[derive(Error, Debug)]
pub enum GatekeepError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Gatekeep operations.
pub type Result<T> = std::result::Result<T, GatekeepError>;
