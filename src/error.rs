//! Error types for AtlasLog
//!
//! Provides a unified error type for all operations.
//!
//! Expected outcomes (a record that does not fit, a position with no record)
//! are NOT errors: they come back as `RecordWriteResult`/`RecordReadResult`
//! with `success == false`. Everything here terminates the operation that
//! raised it.

use thiserror::Error;

/// Result type alias using AtlasError
pub type Result<T> = std::result::Result<T, AtlasError>;

/// Unified error type for AtlasLog operations
#[derive(Debug, Error)]
pub enum AtlasError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Record Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt record at position {position}: {reason}")]
    CorruptRecord { position: u64, reason: String },

    #[error("Incomplete record at position {position}: frame declares {declared} bytes, {available} available")]
    IncompleteRecord {
        position: u64,
        declared: u64,
        available: u64,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Chunk Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt chunk {path}: {reason}")]
    CorruptChunk { path: String, reason: String },

    #[error("Invalid chunk state: {0}")]
    InvalidState(String),

    #[error("Record of {record_size} bytes can never fit a chunk of {chunk_size} bytes")]
    CapacityExceeded { record_size: u64, chunk_size: u64 },

    #[error("No chunk covers log position {0}")]
    PositionNotFound(u64),

    // -------------------------------------------------------------------------
    // Scavenge Errors
    // -------------------------------------------------------------------------
    #[error("Scavenge of chunk {chunk_number} aborted: {reason}")]
    ScavengeAborted { chunk_number: u32, reason: String },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for AtlasError {
    fn from(e: bincode::Error) -> Self {
        AtlasError::Serialization(e.to_string())
    }
}
