//! Chunk Reader
//!
//! Physical frame access inside a chunk's data region. Knows nothing about
//! position maps: callers translate positions before coming here.

use std::fs::File;

use crate::error::Result;
use crate::record::{self, LogRecord, MAX_RECORD_LENGTH, MIN_RECORD_LENGTH};

use super::HEADER_SIZE;

/// A frame located in the data region
#[derive(Debug)]
pub(super) struct PhysicalRecord {
    /// Local physical position where the frame starts
    pub start: u32,
    pub size: u32,
    pub record: LogRecord,
}

/// Read handle onto a chunk file
///
/// Every read is positional (`pread`), so one handle serves any number of
/// concurrent readers without a shared cursor.
pub(super) struct ChunkReader {
    file: File,
}

impl ChunkReader {
    pub(super) fn new(file: File) -> Self {
        Self { file }
    }

    /// Fill `buf` from absolute file offset `offset`
    fn pread_exact(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_exact_at(buf, offset)?;
        }

        #[cfg(not(unix))]
        {
            use std::io;
            use std::os::windows::fs::FileExt;

            let mut filled = 0;
            while filled < buf.len() {
                let n = self.file.seek_read(&mut buf[filled..], offset + filled as u64)?;
                if n == 0 {
                    return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
                }
                filled += n;
            }
        }

        Ok(())
    }

    fn read_exact_at(&self, position: u32, buf: &mut [u8]) -> Result<()> {
        self.pread_exact(HEADER_SIZE + position as u64, buf)
    }

    pub(super) fn read_u32_at(&self, position: u32) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact_at(position, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Decode the frame starting exactly at `start`
    ///
    /// Returns `Ok(None)` when no well-formed frame starts there (zero or
    /// out-of-range length, frame running past `data_end`, or mismatched
    /// length suffix). A frame whose two lengths agree but whose checksum or
    /// body is bad is reported as `CorruptRecord`.
    pub(super) fn frame_at(&self, start: u32, data_end: u32) -> Result<Option<PhysicalRecord>> {
        if start as u64 + 4 > data_end as u64 {
            return Ok(None);
        }

        let length = self.read_u32_at(start)?;
        if !(MIN_RECORD_LENGTH..=MAX_RECORD_LENGTH).contains(&length) {
            return Ok(None);
        }

        let size = length as u64 + 8;
        if start as u64 + size > data_end as u64 {
            return Ok(None);
        }
        let size = size as u32;

        let mut frame = vec![0u8; size as usize];
        self.read_exact_at(start, &mut frame)?;

        let suffix = u32::from_le_bytes(frame[frame.len() - 4..].try_into().unwrap_or_default());
        if suffix != length {
            return Ok(None);
        }

        let record = record::decode_frame(&frame, start as u64)?;
        Ok(Some(PhysicalRecord {
            start,
            size,
            record,
        }))
    }

    /// Decode the frame that ends exactly at `end`, walking back through its
    /// trailing length field
    pub(super) fn frame_ending_at(&self, end: u32, data_end: u32) -> Result<Option<PhysicalRecord>> {
        if end > data_end || end < MIN_RECORD_LENGTH + 8 {
            return Ok(None);
        }

        let length = self.read_u32_at(end - 4)?;
        if !(MIN_RECORD_LENGTH..=MAX_RECORD_LENGTH).contains(&length) {
            return Ok(None);
        }

        let size = length + 8;
        if size > end {
            return Ok(None);
        }

        match self.frame_at(end - size, data_end)? {
            Some(found) if found.size == size => Ok(Some(found)),
            _ => Ok(None),
        }
    }

    /// Feed `len` bytes starting at absolute file offset `from` into `hasher`
    pub(super) fn hash_range(
        &self,
        from: u64,
        len: u64,
        hasher: &mut crc32fast::Hasher,
    ) -> Result<()> {
        let mut offset = from;
        let end = from + len;
        let mut buf = vec![0u8; 64 * 1024];
        while offset < end {
            let n = (end - offset).min(buf.len() as u64) as usize;
            self.pread_exact(offset, &mut buf[..n])?;
            hasher.update(&buf[..n]);
            offset += n as u64;
        }
        Ok(())
    }

    /// Whether the data region between `from` and `to` holds only zeros
    pub(super) fn is_zeroed(&self, from: u32, to: u32) -> Result<bool> {
        let mut offset = from;
        let mut buf = vec![0u8; 64 * 1024];
        while offset < to {
            let n = ((to - offset) as usize).min(buf.len());
            self.read_exact_at(offset, &mut buf[..n])?;
            if buf[..n].iter().any(|&b| b != 0) {
                return Ok(false);
            }
            offset += n as u32;
        }
        Ok(true)
    }

    /// Read `len` bytes at absolute file offset `from`
    pub(super) fn read_absolute(&self, from: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.pread_exact(from, &mut buf)?;
        Ok(buf)
    }
}
