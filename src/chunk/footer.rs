//! Chunk footer and position map entries
//!
//! The footer is always the last `FOOTER_SIZE` bytes of the file. A raw
//! chunk's footer region is still zero-filled, so its `completed` flag
//! reads as unset.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{AtlasError, Result};

use super::{FOOTER_SIZE, POS_MAP_ENTRY_SIZE};

const FLAG_COMPLETED: u8 = 0x01;
const FLAG_HAS_MAP: u8 = 0x02;

/// Written once when the chunk is sealed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkFooter {
    pub is_completed: bool,
    pub has_pos_map: bool,
    /// Bytes of record frames physically present in the data region
    pub physical_data_size: u32,
    /// Bytes of the original log this chunk accounts for
    pub logical_data_size: u64,
    pub map_count: u32,
    /// CRC32 of every file byte preceding this field
    pub checksum: u32,
}

impl ChunkFooter {
    /// Size of the map section that precedes the footer
    pub fn map_size(&self) -> u64 {
        self.map_count as u64 * POS_MAP_ENTRY_SIZE
    }

    /// Layout: flags (1) | reserved (3) | physical (4) | logical (8) | map count (4) | reserved (8) | crc (4)
    pub fn to_bytes(&self) -> [u8; FOOTER_SIZE as usize] {
        let mut out = [0u8; FOOTER_SIZE as usize];
        out[..FOOTER_SIZE as usize - 4].copy_from_slice(&self.prefix_bytes());
        out[FOOTER_SIZE as usize - 4..].copy_from_slice(&self.checksum.to_le_bytes());
        out
    }

    /// Every footer byte covered by the checksum
    pub(crate) fn prefix_bytes(&self) -> Vec<u8> {
        let mut flags = 0u8;
        if self.is_completed {
            flags |= FLAG_COMPLETED;
        }
        if self.has_pos_map {
            flags |= FLAG_HAS_MAP;
        }

        let mut buf = BytesMut::with_capacity(FOOTER_SIZE as usize - 4);
        buf.put_u8(flags);
        buf.put_slice(&[0u8; 3]);
        buf.put_u32_le(self.physical_data_size);
        buf.put_u64_le(self.logical_data_size);
        buf.put_u32_le(self.map_count);
        buf.put_slice(&[0u8; 8]);
        buf.to_vec()
    }

    pub fn from_bytes(bytes: &[u8], path: &str) -> Result<Self> {
        if bytes.len() < FOOTER_SIZE as usize {
            return Err(AtlasError::CorruptChunk {
                path: path.to_string(),
                reason: format!("footer too short: {} bytes", bytes.len()),
            });
        }

        let mut buf = &bytes[..FOOTER_SIZE as usize];
        let flags = buf.get_u8();
        buf.advance(3);
        let physical_data_size = buf.get_u32_le();
        let logical_data_size = buf.get_u64_le();
        let map_count = buf.get_u32_le();
        buf.advance(8);
        let checksum = buf.get_u32_le();

        Ok(Self {
            is_completed: flags & FLAG_COMPLETED != 0,
            has_pos_map: flags & FLAG_HAS_MAP != 0,
            physical_data_size,
            logical_data_size,
            map_count,
            checksum,
        })
    }
}

/// Translation of one surviving record's position after scavenging
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PosMapEntry {
    /// Local position the record was originally written at
    pub old_position: u32,
    /// Local position of the record in the scavenged data region
    pub new_position: u32,
}

impl PosMapEntry {
    pub fn new(old_position: u32, new_position: u32) -> Self {
        Self {
            old_position,
            new_position,
        }
    }

    pub fn encode_into(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.old_position);
        buf.put_u32_le(self.new_position);
    }

    pub fn decode_from(buf: &mut impl Buf) -> Self {
        let old_position = buf.get_u32_le();
        let new_position = buf.get_u32_le();
        Self::new(old_position, new_position)
    }
}
