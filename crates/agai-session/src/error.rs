//! Error types for session registry operations.

/// Error type for session registry operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The OS entropy source failed while generating a session ID.
    #[error("Session ID generation failed: {0}")]
    IdGeneration(String),

    /// Error from the snapshot backend.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Filesystem error while reading or writing a snapshot.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for session registry operations.
pub type Result<T> = std::result::Result<T, Error>;
