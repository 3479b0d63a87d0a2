//! Tests for Scavenger
//!
//! These tests verify:
//! - Replacement decision (smaller output, always_keep_scavenged)
//! - Idempotence (nothing to drop leaves the file byte-identical)
//! - Only prepares consult the discard policy
//! - Multi-pass scavenging keeps original positions
//! - Readers holding the replaced chunk keep working
//! - Replacement events and file cleanup
//! - Failed passes leave the source chunk untouched

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use atlaslog::chunk::HEADER_SIZE;
use atlaslog::record::{CommitLogRecord, EXPECTED_VERSION_ANY};
use atlaslog::{AtlasError, ChunkEvent, ChunkManager, Config, LogRecord, Scavenger, SyncStrategy};
use tempfile::TempDir;
use uuid::Uuid;

const CHUNK_SIZE: u32 = 64 * 1024;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_manager(always_keep: bool) -> (TempDir, PathBuf, ChunkManager) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().to_path_buf();
    let config = Config::builder()
        .data_dir(&path)
        .chunk_size(CHUNK_SIZE)
        .sync_strategy(SyncStrategy::EveryWrite)
        .always_keep_scavenged(always_keep)
        .build();
    let manager = ChunkManager::open(config).unwrap();
    (temp_dir, path, manager)
}

fn write_event(manager: &ChunkManager, stream: &str) -> (LogRecord, u64) {
    let position = manager.write_position().unwrap();
    let record = LogRecord::single_write(
        position,
        Uuid::new_v4(),
        Uuid::new_v4(),
        stream,
        EXPECTED_VERSION_ANY,
        "test-event",
        format!("payload of {}", stream).into_bytes(),
        Vec::new(),
    );
    let result = manager.write(&record).unwrap();
    assert!(result.success);
    (record, result.old_position)
}

fn write_commit(manager: &ChunkManager, transaction_position: u64) -> (LogRecord, u64) {
    let position = manager.write_position().unwrap();
    let record = LogRecord::Commit(CommitLogRecord::new(
        position,
        Uuid::new_v4(),
        transaction_position,
        0,
    ));
    let result = manager.write(&record).unwrap();
    assert!(result.success);
    (record, result.old_position)
}

fn keep_all() -> impl Fn(&str) -> bool {
    |_: &str| false
}

fn discard(stream: &'static str) -> impl Fn(&str) -> bool {
    move |s: &str| s == stream
}

fn read_record(manager: &ChunkManager, position: u64) -> Option<LogRecord> {
    let chunk = manager.get_chunk_for(position).unwrap();
    let local = position - chunk.header().chunk_start_position();
    chunk.try_read_at(local).unwrap().record
}

fn chunk_file(path: &Path, number: u32, version: u32) -> PathBuf {
    path.join(format!("chunk-{:06}.{:06}", number, version))
}

// =============================================================================
// Replacement Decision Tests
// =============================================================================

#[test]
fn test_nothing_to_discard_leaves_file_byte_identical() {
    let (_temp, path, manager) = setup_temp_manager(false);
    for stream in ["a", "b", "c"] {
        write_event(&manager, stream);
    }
    manager.complete_active_and_add_new().unwrap();
    let before = fs::read(chunk_file(&path, 0, 0)).unwrap();

    let result = Scavenger::new(&manager, keep_all()).scavenge_chunk(0).unwrap();

    assert!(!result.replaced);
    assert_eq!(result.records_kept, 3);
    assert_eq!(result.records_discarded, 0);
    assert!(result.new_size > result.old_size);
    assert_eq!(result.space_saved(), 0);

    assert_eq!(manager.chunk_version(0), Some(0));
    assert!(!manager.get_chunk(0).unwrap().is_scavenged());
    assert_eq!(fs::read(chunk_file(&path, 0, 0)).unwrap(), before);
    assert!(!chunk_file(&path, 0, 1).exists());
    assert!(!path.join("chunk-000000.000001.scavenge.tmp").exists());
}

#[test]
fn test_always_keep_replaces_even_without_savings() {
    let (_temp, path, manager) = setup_temp_manager(true);
    let (r1, p1) = write_event(&manager, "a");
    manager.complete_active_and_add_new().unwrap();

    let result = Scavenger::new(&manager, keep_all()).scavenge_chunk(0).unwrap();

    assert!(result.replaced);
    assert_eq!(manager.chunk_version(0), Some(1));
    assert!(manager.get_chunk(0).unwrap().is_scavenged());
    assert!(!chunk_file(&path, 0, 0).exists());
    assert!(chunk_file(&path, 0, 1).exists());
    assert_eq!(read_record(&manager, p1), Some(r1));
}

#[test]
fn test_override_always_keep_per_scavenger() {
    let (_temp, _path, manager) = setup_temp_manager(true);
    write_event(&manager, "a");
    manager.complete_active_and_add_new().unwrap();

    let result = Scavenger::new(&manager, keep_all())
        .always_keep_scavenged(false)
        .scavenge_chunk(0)
        .unwrap();

    assert!(!result.replaced);
    assert_eq!(manager.chunk_version(0), Some(0));
}

#[test]
fn test_discarding_records_shrinks_chunk() {
    let (_temp, path, manager) = setup_temp_manager(false);
    let events = manager.subscribe();
    let (kept, kept_pos) = write_event(&manager, "live");
    let (_, dropped_pos) = write_event(&manager, "deleted");
    write_event(&manager, "deleted");
    manager.complete_active_and_add_new().unwrap();

    let result = Scavenger::new(&manager, discard("deleted")).scavenge_chunk(0).unwrap();

    assert!(result.replaced);
    assert_eq!(result.records_kept, 1);
    assert_eq!(result.records_discarded, 2);
    assert!(result.new_size < result.old_size);
    assert_eq!(result.space_saved(), result.old_size - result.new_size);

    assert_eq!(read_record(&manager, kept_pos), Some(kept));
    assert_eq!(read_record(&manager, dropped_pos), None);
    assert_eq!(
        fs::metadata(chunk_file(&path, 0, 1)).unwrap().len(),
        32 + result.new_size + 32
    );

    let replaced: Vec<_> = events
        .try_iter()
        .filter(|e| matches!(e, ChunkEvent::Replaced { .. }))
        .collect();
    assert_eq!(
        replaced,
        vec![ChunkEvent::Replaced {
            chunk_number: 0,
            old_path: chunk_file(&path, 0, 0),
            new_path: chunk_file(&path, 0, 1),
        }]
    );
}

// =============================================================================
// Policy Tests
// =============================================================================

#[test]
fn test_commits_are_never_discarded() {
    let (_temp, _path, manager) = setup_temp_manager(false);
    let (_, prepare_pos) = write_event(&manager, "deleted");
    let (commit, commit_pos) = write_commit(&manager, prepare_pos);
    let (live, live_pos) = write_event(&manager, "live");
    manager.complete_active_and_add_new().unwrap();

    let result = Scavenger::new(&manager, discard("deleted")).scavenge_chunk(0).unwrap();

    assert_eq!(result.records_kept, 2);
    assert_eq!(read_record(&manager, prepare_pos), None);
    assert_eq!(read_record(&manager, commit_pos), Some(commit));
    assert_eq!(read_record(&manager, live_pos), Some(live));
}

#[test]
fn test_policy_can_be_a_struct() {
    struct DeletedStreams(Vec<String>);

    impl atlaslog::DiscardPolicy for DeletedStreams {
        fn should_discard(&self, stream_id: &str) -> bool {
            self.0.iter().any(|s| s == stream_id)
        }
    }

    let (_temp, _path, manager) = setup_temp_manager(false);
    let (_, a) = write_event(&manager, "a");
    let (_, b) = write_event(&manager, "b");
    let (c_record, c) = write_event(&manager, "c");
    manager.complete_active_and_add_new().unwrap();

    let policy = DeletedStreams(vec!["a".to_string(), "b".to_string()]);
    Scavenger::new(&manager, policy).scavenge().unwrap();

    assert_eq!(read_record(&manager, a), None);
    assert_eq!(read_record(&manager, b), None);
    assert_eq!(read_record(&manager, c), Some(c_record));
}

// =============================================================================
// Whole-Log Tests
// =============================================================================

#[test]
fn test_scavenge_processes_only_completed_chunks() {
    let (_temp, _path, manager) = setup_temp_manager(false);
    write_event(&manager, "deleted");
    write_event(&manager, "live");
    manager.complete_active_and_add_new().unwrap();
    write_event(&manager, "deleted");
    manager.complete_active_and_add_new().unwrap();
    let (raw_record, raw_pos) = write_event(&manager, "deleted");

    let summary = Scavenger::new(&manager, discard("deleted")).scavenge().unwrap();

    let numbers: Vec<_> = summary.chunks.iter().map(|c| c.chunk_number).collect();
    assert_eq!(numbers, vec![0, 1]);
    assert_eq!(summary.chunks_replaced(), 2);
    assert!(summary.space_saved() > 0);

    // The active chunk is untouched
    assert_eq!(read_record(&manager, raw_pos), Some(raw_record));
}

#[test]
fn test_scavenge_chunk_rejects_raw_chunk() {
    let (_temp, _path, manager) = setup_temp_manager(false);
    write_event(&manager, "a");

    let err = Scavenger::new(&manager, keep_all()).scavenge_chunk(0).unwrap_err();
    assert!(matches!(err, AtlasError::InvalidState(_)));

    let err = Scavenger::new(&manager, keep_all()).scavenge_chunk(7).unwrap_err();
    assert!(matches!(err, AtlasError::InvalidState(_)));
}

#[test]
fn test_leftover_temp_file_is_replaced() {
    let (_temp, path, manager) = setup_temp_manager(false);
    let (live, live_pos) = write_event(&manager, "live");
    write_event(&manager, "deleted");
    manager.complete_active_and_add_new().unwrap();
    fs::write(path.join("chunk-000000.000001.scavenge.tmp"), b"garbage").unwrap();

    let result = Scavenger::new(&manager, discard("deleted")).scavenge_chunk(0).unwrap();

    assert!(result.replaced);
    assert_eq!(read_record(&manager, live_pos), Some(live));
}

#[test]
fn test_corrupt_source_aborts_and_leaves_chunk_untouched() {
    let (_temp, path, manager) = setup_temp_manager(false);
    let (live, live_pos) = write_event(&manager, "live");
    let (_, corrupt_pos) = write_event(&manager, "deleted");
    write_event(&manager, "live");
    manager.complete_active_and_add_new().unwrap();
    manager.close().unwrap();

    // Flip a body byte of the second record; checksums are not verified on open
    let file = chunk_file(&path, 0, 0);
    let mut bytes = fs::read(&file).unwrap();
    bytes[(HEADER_SIZE + corrupt_pos + 10) as usize] ^= 0xFF;
    fs::write(&file, &bytes).unwrap();

    let manager = ChunkManager::open(
        Config::builder()
            .data_dir(&path)
            .chunk_size(CHUNK_SIZE)
            .build(),
    )
    .unwrap();

    let err = Scavenger::new(&manager, discard("deleted"))
        .scavenge_chunk(0)
        .unwrap_err();

    assert!(matches!(err, AtlasError::ScavengeAborted { chunk_number: 0, .. }));
    assert_eq!(manager.chunk_version(0), Some(0));
    assert_eq!(fs::read(&file).unwrap(), bytes);
    assert!(!fs::read_dir(&path)
        .unwrap()
        .any(|e| e.unwrap().file_name().to_string_lossy().ends_with(".scavenge.tmp")));
    assert_eq!(read_record(&manager, live_pos), Some(live));
}

// =============================================================================
// Multi-Pass Tests
// =============================================================================

#[test]
fn test_second_pass_keeps_original_positions() {
    let (_temp, path, manager) = setup_temp_manager(false);
    let (_, p1) = write_event(&manager, "first-deleted");
    let (r2, p2) = write_event(&manager, "live");
    let (_, p3) = write_event(&manager, "second-deleted");
    let (r4, p4) = write_event(&manager, "live");
    manager.complete_active_and_add_new().unwrap();
    let logical = manager.get_chunk(0).unwrap().logical_data_size();

    Scavenger::new(&manager, discard("first-deleted")).scavenge_chunk(0).unwrap();
    let result = Scavenger::new(&manager, discard("second-deleted"))
        .scavenge_chunk(0)
        .unwrap();

    assert!(result.replaced);
    assert_eq!(manager.chunk_version(0), Some(2));
    assert!(!chunk_file(&path, 0, 1).exists());

    let chunk = manager.get_chunk(0).unwrap();
    assert_eq!(chunk.logical_data_size(), logical);
    assert_eq!(chunk.pos_map_len(), 2);

    assert_eq!(read_record(&manager, p1), None);
    assert_eq!(read_record(&manager, p2), Some(r2.clone()));
    assert_eq!(read_record(&manager, p3), None);
    assert_eq!(read_record(&manager, p4), Some(r4.clone()));

    // Closest reads still speak original positions
    let read = chunk.try_read_closest_forward(p1).unwrap();
    assert_eq!(read.record, Some(r2));
    let read = chunk.try_read_closest_forward(read.next_position).unwrap();
    assert_eq!(read.record, Some(r4));
    let read = chunk.try_read_closest_backward(p4).unwrap();
    assert_eq!(read.next_position, p2);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_reader_holding_old_chunk_keeps_reading() {
    let (_temp, path, manager) = setup_temp_manager(false);
    let (deleted, deleted_pos) = write_event(&manager, "deleted");
    write_event(&manager, "live");
    manager.complete_active_and_add_new().unwrap();

    let old = manager.get_chunk(0).unwrap();
    Scavenger::new(&manager, discard("deleted")).scavenge_chunk(0).unwrap();

    // The new chunk hides the record, the old handle still has it
    assert_eq!(read_record(&manager, deleted_pos), None);
    assert_eq!(old.try_read_at(deleted_pos).unwrap().record, Some(deleted));
    assert!(chunk_file(&path, 0, 0).exists());

    drop(old);
    assert!(!chunk_file(&path, 0, 0).exists());
}

#[test]
fn test_reads_concurrent_with_scavenge() {
    let (_temp, _path, manager) = setup_temp_manager(false);
    let mut live = Vec::new();
    for i in 0..50 {
        live.push(write_event(&manager, "live"));
        if i % 2 == 0 {
            write_event(&manager, "deleted");
        }
    }
    manager.complete_active_and_add_new().unwrap();

    let manager = Arc::new(manager);
    let live = Arc::new(live);
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let live = Arc::clone(&live);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    for (record, position) in live.iter() {
                        assert_eq!(read_record(&manager, *position).as_ref(), Some(record));
                    }
                }
            })
        })
        .collect();

    let result = Scavenger::new(&manager, discard("deleted")).scavenge_chunk(0).unwrap();
    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }

    assert!(result.replaced);
    assert_eq!(result.records_discarded, 25);
}

#[test]
fn test_writes_and_lookups_continue_across_switches() {
    let (_temp, _path, manager) = setup_temp_manager(true);
    let (first, first_pos) = write_event(&manager, "live");
    manager.complete_active_and_add_new().unwrap();

    let manager = Arc::new(manager);
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let manager = Arc::clone(&manager);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut written = Vec::new();
            while !done.load(Ordering::Acquire) && written.len() < 200 {
                written.push(write_event(&manager, "active"));
                assert_eq!(read_record(&manager, first_pos).as_ref(), Some(&first));
            }
            written
        })
    };

    for pass in 1..=5u32 {
        let result = Scavenger::new(&manager, keep_all()).scavenge_chunk(0).unwrap();
        assert!(result.replaced);
        assert_eq!(manager.chunk_version(0), Some(pass));
    }
    done.store(true, Ordering::Release);
    let written = writer.join().unwrap();

    for (record, position) in &written {
        assert_eq!(read_record(&manager, *position).as_ref(), Some(record));
    }
}
