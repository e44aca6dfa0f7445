//! Error types for breedlog-core

use thiserror::Error;

/// Result type alias using breedlog-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in breedlog-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local persistence failed; the write did not take effect
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

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
}

impl Error {
    /// Whether this error came from the local storage layer.
    #[must_use]
    pub const fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Sqlite(_) | Self::Io(_))
    }
}
