//! Error types for pawsync-core

use thiserror::Error;

/// Result type alias using pawsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in pawsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record, outbox entry or conflict not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A mutation was rejected before anything was applied
    #[error("Validation failed for mutation {index}: {reason}")]
    Validation { index: usize, reason: String },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn validation(index: usize, reason: impl Into<String>) -> Self {
        Self::Validation {
            index,
            reason: reason.into(),
        }
    }
}
