//! Chunk header
//!
//! Written once when the chunk file is created, never modified afterwards.

use bytes::{Buf, BufMut, BytesMut};
use uuid::Uuid;

use crate::error::{AtlasError, Result};

use super::{CHUNK_MAGIC, CHUNK_VERSION, HEADER_SIZE};

/// Identity and capacity of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// On-disk format version
    pub version: u16,
    /// Stable logical identity; survives scavenging
    pub chunk_number: u32,
    /// Capacity of the data region in bytes
    pub chunk_size: u32,
    /// Identity of this particular file
    pub chunk_id: Uuid,
}

impl ChunkHeader {
    pub fn new(chunk_number: u32, chunk_size: u32) -> Self {
        Self {
            version: CHUNK_VERSION,
            chunk_number,
            chunk_size,
            chunk_id: Uuid::new_v4(),
        }
    }

    /// Global position of the first byte of this chunk's data region
    pub fn chunk_start_position(&self) -> u64 {
        self.chunk_number as u64 * self.chunk_size as u64
    }

    /// Global position just past this chunk's data region
    pub fn chunk_end_position(&self) -> u64 {
        (self.chunk_number as u64 + 1) * self.chunk_size as u64
    }

    /// Layout: magic (4) | version (2) | reserved (2) | number (4) | size (4) | id (16)
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE as usize);
        buf.put_slice(CHUNK_MAGIC);
        buf.put_u16_le(self.version);
        buf.put_u16_le(0);
        buf.put_u32_le(self.chunk_number);
        buf.put_u32_le(self.chunk_size);
        buf.put_slice(self.chunk_id.as_bytes());

        let mut out = [0u8; HEADER_SIZE as usize];
        out.copy_from_slice(&buf);
        out
    }

    pub fn from_bytes(bytes: &[u8], path: &str) -> Result<Self> {
        let corrupt = |reason: String| AtlasError::CorruptChunk {
            path: path.to_string(),
            reason,
        };

        if bytes.len() < HEADER_SIZE as usize {
            return Err(corrupt(format!("header too short: {} bytes", bytes.len())));
        }

        if &bytes[0..4] != CHUNK_MAGIC {
            return Err(corrupt(format!(
                "invalid chunk magic: expected ATLC, got {:?}",
                &bytes[0..4]
            )));
        }

        let mut buf = &bytes[4..HEADER_SIZE as usize];
        let version = buf.get_u16_le();
        if version != CHUNK_VERSION {
            return Err(corrupt(format!("unsupported chunk version {}", version)));
        }
        let _reserved = buf.get_u16_le();
        let chunk_number = buf.get_u32_le();
        let chunk_size = buf.get_u32_le();

        let mut id = [0u8; 16];
        buf.copy_to_slice(&mut id);

        Ok(Self {
            version,
            chunk_number,
            chunk_size,
            chunk_id: Uuid::from_bytes(id),
        })
    }
}
