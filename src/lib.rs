//! # AtlasLog
//!
//! A chunked, append-only transaction log for event-sourced storage:
//! - Fixed-capacity chunk files of checksummed, variable-length records
//! - Positional reads in both directions (first/last/closest-forward/backward)
//! - Scavenging: compaction that drops unneeded records while keeping every
//!   surviving record addressable by its original position
//! - Single-writer/multi-reader concurrency model
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ChunkManager                          │
//! │        (chunk table, roll-over writes, replacement events)   │
//! └───────┬─────────────────────┬───────────────────────▲───────┘
//!         │ write               │ get_chunk             │ switch_chunk
//!         ▼                     ▼                       │
//!   ┌───────────┐   ┌───────────┬───────────┐   ┌───────┴───────┐
//!   │  Chunk #N │   │ Chunk #0  │ Chunk #1  │◄──│   Scavenger   │
//!   │   (Raw)   │   │(Completed)│(Scavenged)│   │ (DiscardPolicy│
//!   └───────────┘   └───────────┴───────────┘   └───────────────┘
//!         │
//!         ▼
//!   ┌───────────────────────────────┐
//!   │ LogRecord codec               │
//!   │ [Len][Type|Ver|Body][CRC][Len]│
//!   └───────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod record;
pub mod chunk;
pub mod manager;
pub mod scavenger;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{AtlasError, Result};
pub use config::{Config, SyncStrategy};
pub use record::LogRecord;
pub use chunk::{Chunk, RecordReadResult, RecordWriteResult};
pub use manager::{ChunkEvent, ChunkManager};
pub use scavenger::{DiscardPolicy, ScavengeSummary, Scavenger};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of AtlasLog
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
