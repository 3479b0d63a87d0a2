//! Tests for the record codec
//!
//! These tests verify:
//! - Frame layout (length prefix/suffix, checksum placement)
//! - Decoding of every record variant
//! - Detection of corruption and truncation
//! - Frame sizing used for capacity checks

use atlaslog::record::{
    decode_record, encode_record, record_size, CommitLogRecord, PrepareFlags, RecordType,
    SystemLogRecord, SystemRecordKind, EXPECTED_VERSION_ANY, FRAME_OVERHEAD, RECORD_VERSION,
};
use atlaslog::{AtlasError, LogRecord};
use uuid::Uuid;

// =============================================================================
// Helper Functions
// =============================================================================

fn prepare(position: u64, stream: &str, data: &[u8]) -> LogRecord {
    LogRecord::single_write(
        position,
        Uuid::new_v4(),
        Uuid::new_v4(),
        stream,
        EXPECTED_VERSION_ANY,
        "test-event",
        data,
        b"meta".as_slice(),
    )
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

// =============================================================================
// Frame Layout Tests
// =============================================================================

#[test]
fn test_frame_lengths_match_and_cover_payload() {
    let frame = encode_record(&prepare(0, "stream-a", b"hello")).unwrap();

    let prefix = read_u32(&frame, 0);
    let suffix = read_u32(&frame, frame.len() - 4);

    assert_eq!(prefix, suffix);
    assert_eq!(prefix as usize + 8, frame.len());
}

#[test]
fn test_frame_checksum_covers_prefix_and_payload() {
    let frame = encode_record(&prepare(0, "stream-a", b"hello")).unwrap();

    let crc_offset = frame.len() - 8;
    let stored = read_u32(&frame, crc_offset);

    assert_eq!(stored, crc32fast::hash(&frame[..crc_offset]));
}

#[test]
fn test_payload_starts_with_type_and_version() {
    let frame = encode_record(&prepare(0, "s", b"")).unwrap();
    assert_eq!(frame[4], RecordType::Prepare as u8);
    assert_eq!(frame[5], 1);

    let commit = LogRecord::Commit(CommitLogRecord::new(100, Uuid::new_v4(), 0, 7));
    let frame = encode_record(&commit).unwrap();
    assert_eq!(frame[4], RecordType::Commit as u8);
}

#[test]
fn test_record_size_matches_encoded_frame() {
    let record = prepare(42, "stream-a", &[7u8; 300]);

    let frame = encode_record(&record).unwrap();

    assert_eq!(record_size(&record).unwrap(), frame.len());
    assert_eq!(record.frame_size().unwrap(), frame.len());
    assert!(frame.len() > 300 + FRAME_OVERHEAD);
}

// =============================================================================
// Decoding Tests
// =============================================================================

#[test]
fn test_decode_every_variant() {
    let records = vec![
        prepare(0, "stream-a", b"payload"),
        LogRecord::Commit(CommitLogRecord::new(120, Uuid::new_v4(), 0, 3)),
        LogRecord::System(SystemLogRecord::new(200, SystemRecordKind::Epoch, vec![1, 2, 3])),
    ];

    let mut bytes = Vec::new();
    for record in &records {
        bytes.extend(encode_record(record).unwrap());
    }

    let mut offset = 0;
    for expected in &records {
        let (decoded, next) = decode_record(&bytes, offset).unwrap();
        assert_eq!(&decoded, expected);
        offset = next;
    }
    assert_eq!(offset, bytes.len());
}

#[test]
fn test_single_write_fields() {
    let correlation = Uuid::new_v4();
    let event = Uuid::new_v4();
    let record = LogRecord::single_write(
        500,
        correlation,
        event,
        "orders-1",
        5,
        "OrderPlaced",
        b"{}".as_slice(),
        Vec::new(),
    );

    assert_eq!(record.log_position(), 500);
    assert_eq!(record.stream_id(), Some("orders-1"));
    assert_eq!(record.record_type(), RecordType::Prepare);

    let LogRecord::Prepare(p) = record else {
        panic!("expected a prepare");
    };
    assert_eq!(p.transaction_position, 500);
    assert_eq!(p.transaction_offset, 0);
    assert_eq!(p.expected_version, 5);
    assert_eq!(p.event_id, event);
    assert_eq!(p.correlation_id, correlation);
    assert!(p.flags.contains(PrepareFlags::DATA));
    assert!(p.flags.contains(PrepareFlags::TRANSACTION_BEGIN | PrepareFlags::TRANSACTION_END));
    assert!(!p.is_stream_delete());
}

#[test]
fn test_commit_and_system_have_no_stream() {
    let commit = LogRecord::Commit(CommitLogRecord::new(0, Uuid::new_v4(), 0, 0));
    let system = LogRecord::System(SystemLogRecord::new(0, SystemRecordKind::Epoch, Vec::new()));

    assert_eq!(commit.stream_id(), None);
    assert_eq!(system.stream_id(), None);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_flipped_payload_byte_is_corrupt() {
    let mut frame = encode_record(&prepare(0, "stream-a", b"hello")).unwrap();
    frame[10] ^= 0xFF;

    let err = decode_record(&frame, 0).unwrap_err();
    assert!(matches!(err, AtlasError::CorruptRecord { position: 0, .. }));
}

#[test]
fn test_mismatched_suffix_is_corrupt() {
    let mut frame = encode_record(&prepare(0, "stream-a", b"hello")).unwrap();
    let last = frame.len() - 1;
    frame[last] ^= 0x01;

    let err = decode_record(&frame, 0).unwrap_err();
    assert!(matches!(err, AtlasError::CorruptRecord { .. }));
}

#[test]
fn test_truncated_frame_is_incomplete() {
    let frame = encode_record(&prepare(0, "stream-a", b"hello")).unwrap();
    let truncated = &frame[..frame.len() - 3];

    let err = decode_record(truncated, 0).unwrap_err();
    assert!(matches!(
        err,
        AtlasError::IncompleteRecord { position: 0, declared, available }
            if declared == frame.len() as u64 && available == truncated.len() as u64
    ));
}

#[test]
fn test_zero_length_is_corrupt() {
    let zeros = [0u8; 32];

    let err = decode_record(&zeros, 0).unwrap_err();
    assert!(matches!(err, AtlasError::CorruptRecord { .. }));
}

#[test]
fn test_less_than_length_field_is_incomplete() {
    let err = decode_record(&[1, 2], 0).unwrap_err();
    assert!(matches!(err, AtlasError::IncompleteRecord { .. }));
}

#[test]
fn test_undecodable_body_is_corrupt() {
    // A well-sealed frame whose prepare body is a single byte
    let payload = [RecordType::Prepare as u8, RECORD_VERSION, 0xFF];
    let length = (payload.len() + 4) as u32;
    let mut frame = length.to_le_bytes().to_vec();
    frame.extend_from_slice(&payload);
    let crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.extend_from_slice(&length.to_le_bytes());

    let err = decode_record(&frame, 0).unwrap_err();
    assert!(matches!(err, AtlasError::CorruptRecord { position: 0, .. }));
}

#[test]
fn test_unknown_record_type_is_corrupt() {
    let mut frame = encode_record(&prepare(0, "s", b"x")).unwrap();
    frame[4] = 0x7F;
    // Re-seal the checksum so only the type byte is wrong
    let crc_offset = frame.len() - 8;
    let crc = crc32fast::hash(&frame[..crc_offset]);
    frame[crc_offset..crc_offset + 4].copy_from_slice(&crc.to_le_bytes());

    let err = decode_record(&frame, 0).unwrap_err();
    assert!(matches!(err, AtlasError::CorruptRecord { .. }));
}
