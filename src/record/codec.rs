//! Record codec
//!
//! Encoding and decoding of record frames.
//!
//! ## Frame Format
//! ```text
//! ┌────────────┬─────────────────────┬───────────┬────────────┐
//! │ Length (4) │ Payload (Length-4)  │ CRC32 (4) │ Length (4) │
//! └────────────┴─────────────────────┴───────────┴────────────┘
//! ```
//!
//! CRC32 covers the leading length field and the payload. All integers are
//! little-endian.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{AtlasError, Result};

use super::{LogRecord, RecordType, RECORD_VERSION};

/// Bytes a frame adds around its payload: two lengths + checksum
pub const FRAME_OVERHEAD: usize = 12;

/// Smallest valid length field: type + version bytes + checksum
pub const MIN_RECORD_LENGTH: u32 = 2 + CHECKSUM_SIZE as u32;

/// Largest valid length field (16 MB)
pub const MAX_RECORD_LENGTH: u32 = 16 * 1024 * 1024;

const LENGTH_SIZE: usize = 4;
const CHECKSUM_SIZE: usize = 4;

// =============================================================================
// Encoding
// =============================================================================

/// Encode a record into a complete frame
pub fn encode_record(record: &LogRecord) -> Result<Vec<u8>> {
    let payload = encode_payload(record)?;

    let length = payload.len() + CHECKSUM_SIZE;
    if length > MAX_RECORD_LENGTH as usize {
        return Err(AtlasError::Serialization(format!(
            "Record too large: {} bytes (max {})",
            length, MAX_RECORD_LENGTH
        )));
    }
    let length = length as u32;

    let mut frame = BytesMut::with_capacity(payload.len() + FRAME_OVERHEAD);
    frame.put_u32_le(length);
    frame.put_slice(&payload);

    let crc = crc32fast::hash(&frame);
    frame.put_u32_le(crc);
    frame.put_u32_le(length);

    Ok(frame.to_vec())
}

/// Size of the record's frame: payload + framing overhead
pub fn record_size(record: &LogRecord) -> Result<usize> {
    Ok(encode_payload(record)?.len() + FRAME_OVERHEAD)
}

/// Payload: type (1) + version (1) + bincode body
fn encode_payload(record: &LogRecord) -> Result<Vec<u8>> {
    let mut payload = vec![record.record_type() as u8, RECORD_VERSION];
    match record {
        LogRecord::Prepare(r) => bincode::serialize_into(&mut payload, r)?,
        LogRecord::Commit(r) => bincode::serialize_into(&mut payload, r)?,
        LogRecord::System(r) => bincode::serialize_into(&mut payload, r)?,
    }
    Ok(payload)
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode the frame starting at `offset`
///
/// Returns the record and the offset immediately after its frame.
///
/// Errors:
/// - `IncompleteRecord`: fewer bytes than the leading length declares
/// - `CorruptRecord`: bad length, mismatched trailing length, bad checksum
///   or undecodable payload
pub fn decode_record(bytes: &[u8], offset: usize) -> Result<(LogRecord, usize)> {
    let position = offset as u64;
    let available = bytes.len().saturating_sub(offset);

    if available < LENGTH_SIZE {
        return Err(AtlasError::IncompleteRecord {
            position,
            declared: LENGTH_SIZE as u64,
            available: available as u64,
        });
    }

    let mut head = &bytes[offset..offset + LENGTH_SIZE];
    let length = head.get_u32_le();
    if !(MIN_RECORD_LENGTH..=MAX_RECORD_LENGTH).contains(&length) {
        return Err(AtlasError::CorruptRecord {
            position,
            reason: format!("invalid record length {}", length),
        });
    }

    let frame_size = length as usize + 2 * LENGTH_SIZE;
    if available < frame_size {
        return Err(AtlasError::IncompleteRecord {
            position,
            declared: frame_size as u64,
            available: available as u64,
        });
    }

    let record = decode_frame(&bytes[offset..offset + frame_size], position)?;
    Ok((record, offset + frame_size))
}

/// Decode exactly one frame; `position` is only used for error reporting
pub(crate) fn decode_frame(frame: &[u8], position: u64) -> Result<LogRecord> {
    let corrupt = |reason: String| AtlasError::CorruptRecord { position, reason };

    if frame.len() < MIN_RECORD_LENGTH as usize + 2 * LENGTH_SIZE {
        return Err(corrupt(format!("frame of {} bytes is too short", frame.len())));
    }

    let length = (&frame[..LENGTH_SIZE]).get_u32_le();
    let suffix = (&frame[frame.len() - LENGTH_SIZE..]).get_u32_le();
    if length != suffix || length as usize + 2 * LENGTH_SIZE != frame.len() {
        return Err(corrupt(format!(
            "length prefix {} does not match suffix {}",
            length, suffix
        )));
    }

    let crc_offset = frame.len() - LENGTH_SIZE - CHECKSUM_SIZE;
    let stored_crc = (&frame[crc_offset..crc_offset + CHECKSUM_SIZE]).get_u32_le();
    let computed_crc = crc32fast::hash(&frame[..crc_offset]);
    if stored_crc != computed_crc {
        return Err(corrupt(format!(
            "checksum mismatch: stored {:08x}, computed {:08x}",
            stored_crc, computed_crc
        )));
    }

    decode_payload(&frame[LENGTH_SIZE..crc_offset], position)
}

fn decode_payload(payload: &[u8], position: u64) -> Result<LogRecord> {
    let record_type = RecordType::from_byte(payload[0]).ok_or_else(|| AtlasError::CorruptRecord {
        position,
        reason: format!("unknown record type {:#04x}", payload[0]),
    })?;

    if payload[1] != RECORD_VERSION {
        return Err(AtlasError::CorruptRecord {
            position,
            reason: format!("unsupported record version {}", payload[1]),
        });
    }

    let body = &payload[2..];
    let decoded = match record_type {
        RecordType::Prepare => bincode::deserialize(body).map(LogRecord::Prepare),
        RecordType::Commit => bincode::deserialize(body).map(LogRecord::Commit),
        RecordType::System => bincode::deserialize(body).map(LogRecord::System),
    };
    decoded.map_err(|e| AtlasError::CorruptRecord {
        position,
        reason: format!("undecodable {:?} body: {}", record_type, e),
    })
}
