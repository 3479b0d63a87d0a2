//! Prepare records
//!
//! A prepare carries one event of a (possibly multi-event) transaction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bit flags describing a prepare's role in its transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrepareFlags(u16);

impl PrepareFlags {
    pub const NONE: PrepareFlags = PrepareFlags(0x0000);
    pub const DATA: PrepareFlags = PrepareFlags(0x0001);
    pub const TRANSACTION_BEGIN: PrepareFlags = PrepareFlags(0x0002);
    pub const TRANSACTION_END: PrepareFlags = PrepareFlags(0x0004);
    pub const STREAM_DELETE: PrepareFlags = PrepareFlags(0x0008);
    pub const IS_COMMITTED: PrepareFlags = PrepareFlags(0x0020);
    pub const IS_JSON: PrepareFlags = PrepareFlags(0x0100);

    /// Flags of a self-contained single event transaction
    pub const SINGLE_WRITE: PrepareFlags =
        PrepareFlags(Self::DATA.0 | Self::TRANSACTION_BEGIN.0 | Self::TRANSACTION_END.0);

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn from_bits(bits: u16) -> Self {
        PrepareFlags(bits)
    }

    pub const fn contains(self, other: PrepareFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for PrepareFlags {
    type Output = PrepareFlags;

    fn bitor(self, rhs: PrepareFlags) -> PrepareFlags {
        PrepareFlags(self.0 | rhs.0)
    }
}

/// One event of a stream write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareLogRecord {
    pub log_position: u64,
    pub flags: PrepareFlags,
    /// Position of the transaction's first prepare
    pub transaction_position: u64,
    /// Index of this event within the transaction
    pub transaction_offset: u32,
    pub expected_version: i64,
    pub event_stream_id: String,
    pub event_id: Uuid,
    pub correlation_id: Uuid,
    /// Unix millis
    pub timestamp: u64,
    pub event_type: String,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
}

impl PrepareLogRecord {
    /// Whether this prepare tombstones its stream
    pub fn is_stream_delete(&self) -> bool {
        self.flags.contains(PrepareFlags::STREAM_DELETE)
    }
}
