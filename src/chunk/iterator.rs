//! Chunk Iterator
//!
//! Sequential iteration over every record of a chunk in position order.

use crate::error::Result;
use crate::record::LogRecord;

use super::Chunk;

/// A record found by a forward scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedRecord {
    /// Local position the record was originally written at
    pub original_position: u64,
    /// Local position of the frame in the current file
    pub physical_position: u64,
    /// Frame size in bytes
    pub size: u32,
    pub record: LogRecord,
}

/// Iterator over a chunk's records (used by scavenging, dumping)
///
/// Each step takes the chunk's read handle once, so appends and other
/// readers interleave freely between steps.
pub struct ChunkRecords<'a> {
    chunk: &'a Chunk,
    /// Next physical position (unscavenged chunks)
    cursor: u32,
    /// Next map index (scavenged chunks)
    index: usize,
    done: bool,
}

impl<'a> ChunkRecords<'a> {
    pub(super) fn new(chunk: &'a Chunk) -> Self {
        Self {
            chunk,
            cursor: 0,
            index: 0,
            done: false,
        }
    }
}

impl<'a> Iterator for ChunkRecords<'a> {
    type Item = Result<ScannedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.chunk.scan_next(self.cursor, self.index) {
            Ok(Some(scanned)) => {
                self.cursor = (scanned.physical_position + scanned.size as u64) as u32;
                self.index += 1;
                Some(Ok(scanned))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
