//! Error types for the attendance engine

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Submission rejected before touching history
    #[error("Validation error: {0}")]
    Validation(String),

    /// The optical extraction collaborator failed or returned malformed data
    #[error("Extraction service failure: {0}")]
    ExternalService(String),

    #[error("No row has a resolved student; resolve at least one identity before committing")]
    CommitWithoutMatches,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
