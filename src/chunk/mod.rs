//! Chunk Module
//!
//! A chunk is one fixed-capacity segment of the transaction log.
//!
//! ## Lifecycle
//! ```text
//!   create_new ──► Raw ──complete()──► Completed ──dispose()──► Disposed
//!                   │ try_append             │ reads only
//!                   │ reads                  │
//!                   └── (scavenge output) ───┴── complete_scavenged(): Completed + PosMap
//! ```
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (32 bytes)                                       │
//! │   Magic "ATLC" (4) | Version (2) | Reserved (2)         │
//! │   ChunkNumber (4) | ChunkSize (4) | ChunkId (16)        │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data Region (physical_data_size bytes)                  │
//! │   [Len][Payload][CRC32][Len] ... record frames ...      │
//! ├─────────────────────────────────────────────────────────┤
//! │ Position Map (map_count × 8 bytes, scavenged only)      │
//! │   [OldPos: u32][NewPos: u32] ordered by OldPos          │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (32 bytes)                                       │
//! │   Flags (1) | Reserved (3) | Physical (4) | Logical (8) │
//! │   MapCount (4) | Reserved (8) | CRC32 (4)               │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! A raw chunk is preallocated to `Header + ChunkSize + Footer` with a
//! zeroed tail; completing it trims the file to the layout above.

mod file;
mod footer;
mod header;
mod iterator;
mod reader;
mod results;
mod writer;

pub use file::{Chunk, ChunkState};
pub use footer::{ChunkFooter, PosMapEntry};
pub use header::ChunkHeader;
pub use iterator::{ChunkRecords, ScannedRecord};
pub use results::{RecordReadResult, RecordWriteResult};

// =============================================================================
// Shared Constants (used by header, footer, reader, writer)
// =============================================================================

/// Magic bytes identifying an AtlasLog chunk file
pub(crate) const CHUNK_MAGIC: &[u8; 4] = b"ATLC";

/// Current chunk format version
pub(crate) const CHUNK_VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + Reserved (2) + Number (4) + Size (4) + Id (16)
pub const HEADER_SIZE: u64 = 32;

/// Footer size: Flags (4) + Physical (4) + Logical (8) + MapCount (4) + Reserved (8) + CRC (4)
pub const FOOTER_SIZE: u64 = 32;

/// Position map entry: OldPos (4) + NewPos (4)
pub const POS_MAP_ENTRY_SIZE: u64 = 8;
