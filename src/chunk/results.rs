//! Outcomes of chunk appends and reads
//!
//! Expected failures (no room, no record) are carried here instead of as
//! errors so scanning code can branch on `success`.

use crate::record::LogRecord;

/// Outcome of an append attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordWriteResult {
    pub success: bool,
    /// Where the frame began (or would have begun)
    pub old_position: u64,
    /// Where the next frame starts
    pub new_position: u64,
}

impl RecordWriteResult {
    pub fn successful(old_position: u64, new_position: u64) -> Self {
        Self {
            success: true,
            old_position,
            new_position,
        }
    }

    /// Nothing was written; both positions report the unchanged write position
    pub fn failed(position: u64) -> Self {
        Self {
            success: false,
            old_position: position,
            new_position: position,
        }
    }
}

/// Outcome of a positional read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordReadResult {
    pub success: bool,
    /// Position to continue scanning from, in original (pre-scavenge) local
    /// coordinates. Forward reads: just after the record. Backward reads:
    /// the record's own start. Meaningless when `success` is false.
    pub next_position: u64,
    pub record: Option<LogRecord>,
}

impl RecordReadResult {
    pub fn found(record: LogRecord, next_position: u64) -> Self {
        Self {
            success: true,
            next_position,
            record: Some(record),
        }
    }

    pub fn not_found() -> Self {
        Self {
            success: false,
            next_position: 0,
            record: None,
        }
    }
}
