//! Error types for blob storage

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage error types
#[derive(Error, Debug)]
pub enum StorageError {
    /// The fragment does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The credentials do not grant access to the fragment
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Storage backend unavailable
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Timeout occurred
    #[error("Timeout: operation took longer than {0:?}")]
    Timeout(Duration),

    /// The fetch was abandoned because its part was cancelled
    #[error("Cancelled")]
    Cancelled,

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StorageError {
    /// Create a not found error
    pub fn not_found<E: fmt::Display>(item: E) -> Self {
        Self::NotFound(item.to_string())
    }

    /// Create a forbidden error
    pub fn forbidden<E: fmt::Display>(item: E) -> Self {
        Self::Forbidden(item.to_string())
    }

    /// Create an unavailable error
    pub fn unavailable<E: fmt::Display>(msg: E) -> Self {
        Self::Unavailable(msg.to_string())
    }

    /// Create a configuration error
    pub fn configuration<E: fmt::Display>(msg: E) -> Self {
        Self::Configuration(msg.to_string())
    }

    /// Check if this is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
