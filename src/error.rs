/// Crate-wide error taxonomy.
///
/// Per-document failures (`ParseFailure`, `Embedding`) are collected into the
/// run summary and never abort an indexing run; `BackendUnavailable` and
/// `DimensionMismatch` are fatal for the run they occur in.
use thiserror::Error;

use crate::embedder::EmbedderError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A referenced path or id does not exist. Returned to the caller,
    /// never logged as an error.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness or foreign-key constraint was violated outside the
    /// defined upsert path.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// A document could not be parsed. The document is skipped and the run
    /// continues.
    #[error("failed to parse {path}: {reason}")]
    ParseFailure { path: String, reason: String },

    /// The embedding provider failed. Prior indexed state for the document
    /// is preserved.
    #[error(transparent)]
    Embedding(#[from] EmbedderError),

    /// The vector backend cannot be reached or initialized.
    #[error("vector backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Configured vector dimensionality does not match the index or an
    /// incoming vector. Vectors are never truncated or padded.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A store invariant is violated (e.g. a vector with no owning chunk).
    /// Remediation is a full rebuild; never auto-repaired.
    #[error("storage corruption: {0}")]
    StorageCorruption(String),

    /// A second indexing run was requested while one is active.
    #[error("an indexing run is already in progress")]
    RunInProgress,

    #[error(transparent)]
    Sqlite(rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Error::ConstraintViolation(
                    msg.clone().unwrap_or_else(|| code.to_string()),
                )
            }
            _ => Error::Sqlite(err),
        }
    }
}
