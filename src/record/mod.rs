//! Log Record Module
//!
//! Defines the records stored in chunks and their on-disk framing.
//!
//! ## Responsibilities
//! - Closed set of record variants (prepare, commit, system)
//! - Length-prefixed, length-suffixed, CRC32-checked frames
//! - Frame sizing for capacity checks before appending
//!
//! ## Frame Format
//! ```text
//! ┌────────────┬──────────────────────────────┬───────────┬────────────┐
//! │ Length (4) │ Payload                      │ CRC32 (4) │ Length (4) │
//! │            │ Type (1) | Ver (1) | Body    │           │            │
//! └────────────┴──────────────────────────────┴───────────┴────────────┘
//!   Length = payload + checksum; both copies are equal so a reader can
//!   walk frames backwards from the trailing copy.
//! ```

mod codec;
mod commit;
mod prepare;
mod system;

pub use codec::{
    decode_record, encode_record, record_size, FRAME_OVERHEAD, MAX_RECORD_LENGTH,
    MIN_RECORD_LENGTH,
};
pub(crate) use codec::decode_frame;
pub use commit::CommitLogRecord;
pub use prepare::{PrepareFlags, PrepareLogRecord};
pub use system::{SystemLogRecord, SystemRecordKind};

use uuid::Uuid;

use crate::error::Result;

/// Current record layout version, written after the type byte
pub const RECORD_VERSION: u8 = 1;

/// Expected version meaning "append regardless of the stream's state"
pub const EXPECTED_VERSION_ANY: i64 = -2;

/// Discriminator written as the first payload byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    Prepare = 0x00,
    Commit = 0x01,
    System = 0x02,
}

impl RecordType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(RecordType::Prepare),
            0x01 => Some(RecordType::Commit),
            0x02 => Some(RecordType::System),
            _ => None,
        }
    }
}

/// A single entry of the transaction log
///
/// Two records are equal iff their variant, fields and payload bytes are
/// equal, which is what scavenging must preserve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// An event written to a stream
    Prepare(PrepareLogRecord),

    /// Commit of a previously prepared transaction
    Commit(CommitLogRecord),

    /// Internal record (epochs etc.)
    System(SystemLogRecord),
}

impl LogRecord {
    /// Build a prepare record holding a complete single-event transaction
    #[allow(clippy::too_many_arguments)]
    pub fn single_write(
        log_position: u64,
        correlation_id: Uuid,
        event_id: Uuid,
        event_stream_id: impl Into<String>,
        expected_version: i64,
        event_type: impl Into<String>,
        data: impl Into<Vec<u8>>,
        metadata: impl Into<Vec<u8>>,
    ) -> Self {
        LogRecord::Prepare(PrepareLogRecord {
            log_position,
            flags: PrepareFlags::SINGLE_WRITE,
            transaction_position: log_position,
            transaction_offset: 0,
            expected_version,
            event_stream_id: event_stream_id.into(),
            event_id,
            correlation_id,
            timestamp: now_millis(),
            event_type: event_type.into(),
            data: data.into(),
            metadata: metadata.into(),
        })
    }

    /// Global log position the record was written at
    pub fn log_position(&self) -> u64 {
        match self {
            LogRecord::Prepare(r) => r.log_position,
            LogRecord::Commit(r) => r.log_position,
            LogRecord::System(r) => r.log_position,
        }
    }

    pub fn record_type(&self) -> RecordType {
        match self {
            LogRecord::Prepare(_) => RecordType::Prepare,
            LogRecord::Commit(_) => RecordType::Commit,
            LogRecord::System(_) => RecordType::System,
        }
    }

    /// Stream the record belongs to (only prepares have one)
    pub fn stream_id(&self) -> Option<&str> {
        match self {
            LogRecord::Prepare(r) => Some(&r.event_stream_id),
            _ => None,
        }
    }

    /// Size of the record's frame on disk
    pub fn frame_size(&self) -> Result<usize> {
        record_size(self)
    }
}

/// Unix time in milliseconds
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
