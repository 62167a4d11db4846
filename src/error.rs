// src/error.rs

//! Typed error taxonomy for the memory lifecycle engine.
//! Facade operations surface exactly one of these; background passes log
//! and skip per-record failures instead of bubbling them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    /// Malformed input rejected before any side effect: oversized content,
    /// invalid tag count/length, out-of-range confidence, unknown kind.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Update/delete against an unknown or already-deleted record.
    #[error("memory not found: {0}")]
    NotFound(String),

    /// Embedding provider failure after retries were exhausted.
    #[error("embedding provider error: {0}")]
    Provider(String),

    /// Compression failed and the uncompressed fallback did not fit.
    #[error("compression error: {0}")]
    Compression(String),

    /// A record was mutated underneath an in-flight operation and the
    /// single retry with a fresh read also lost.
    #[error("concurrent modification of memory {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for MemoryError {
    fn from(err: sqlx::Error) -> Self {
        MemoryError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        MemoryError::Database(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
