//! Chunk file
//!
//! Owns one chunk file: appends while raw, positional reads at all times,
//! position-map translation once scavenged.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use bytes::Buf;
use parking_lot::{Mutex, RwLock};

use crate::config::SyncStrategy;
use crate::error::{AtlasError, Result};
use crate::record::{self, LogRecord};

use super::iterator::{ChunkRecords, ScannedRecord};
use super::reader::{ChunkReader, PhysicalRecord};
use super::writer::ChunkWriter;
use super::{
    ChunkFooter, ChunkHeader, PosMapEntry, RecordReadResult, RecordWriteResult, FOOTER_SIZE,
    HEADER_SIZE, POS_MAP_ENTRY_SIZE,
};

/// Lifecycle state of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// Accepting appends
    Raw,
    /// Sealed, read-only
    Completed,
    /// Handles released; every operation fails
    Disposed,
}

/// State that changes when the chunk is sealed or disposed
struct ChunkMeta {
    state: ChunkState,
    footer: Option<ChunkFooter>,
    /// Present iff the chunk is the output of a scavenge
    pos_map: Option<Vec<PosMapEntry>>,
}

/// One chunk of the transaction log
///
/// ## Concurrency:
/// - Appends are serialized by `writer`; callers still need single-writer
///   discipline across chunks.
/// - Reads share `meta` and `reader` (read locks); the reader only does
///   positional reads, so concurrent readers never wait on each other.
/// - `data_end` publishes how much of the data region readers may see, so a
///   reader never observes the frame currently being appended.
/// - Lock order: writer → meta → reader.
///
/// Chunks are shared as `Arc<Chunk>`. A chunk replaced by scavenging is
/// marked for deletion and its file is removed when the last `Arc` drops.
pub struct Chunk {
    path: PathBuf,
    header: ChunkHeader,
    meta: RwLock<ChunkMeta>,
    writer: Mutex<Option<ChunkWriter>>,
    reader: RwLock<Option<ChunkReader>>,
    /// Physical bytes of record data visible to readers
    data_end: AtomicU32,
    delete_on_drop: AtomicBool,
}

impl Chunk {
    // =========================================================================
    // Creation
    // =========================================================================

    /// Create a new, empty raw chunk file
    ///
    /// Fails if `path` already exists.
    pub fn create_new(
        path: &Path,
        chunk_number: u32,
        chunk_size: u32,
        sync_strategy: SyncStrategy,
    ) -> Result<Self> {
        let header = ChunkHeader::new(chunk_number, chunk_size);
        let header_bytes = header.to_bytes();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.write_all(&header_bytes)?;
        file.set_len(HEADER_SIZE + chunk_size as u64 + FOOTER_SIZE)?;
        file.sync_all()?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header_bytes);
        let writer = ChunkWriter::new(file, 0, hasher, sync_strategy)?;
        let reader = ChunkReader::new(File::open(path)?);

        tracing::debug!(chunk = chunk_number, path = %path.display(), "Created new chunk");

        Ok(Self::assemble(
            path,
            header,
            ChunkMeta {
                state: ChunkState::Raw,
                footer: None,
                pos_map: None,
            },
            Some(writer),
            reader,
            0,
        ))
    }

    /// Open an existing chunk file
    ///
    /// - Completed chunks: footer and position map are loaded and validated.
    /// - Raw chunks: the write position is recovered by scanning frames
    ///   forward; a torn frame at the tail is zeroed out.
    pub fn open_existing(path: &Path, sync_strategy: SyncStrategy) -> Result<Self> {
        let path_str = path.display().to_string();
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(AtlasError::CorruptChunk {
                path: path_str,
                reason: format!("file of {} bytes is too small", file_size),
            });
        }

        let reader = ChunkReader::new(file);
        let header = ChunkHeader::from_bytes(&reader.read_absolute(0, HEADER_SIZE as usize)?, &path_str)?;
        let footer = ChunkFooter::from_bytes(
            &reader.read_absolute(file_size - FOOTER_SIZE, FOOTER_SIZE as usize)?,
            &path_str,
        )?;

        if footer.is_completed {
            Self::open_completed(path, header, footer, reader, file_size)
        } else {
            Self::open_raw(path, header, reader, sync_strategy)
        }
    }

    fn open_completed(
        path: &Path,
        header: ChunkHeader,
        footer: ChunkFooter,
        reader: ChunkReader,
        file_size: u64,
    ) -> Result<Self> {
        let corrupt = |reason: String| AtlasError::CorruptChunk {
            path: path.display().to_string(),
            reason,
        };

        let expected_size =
            HEADER_SIZE + footer.physical_data_size as u64 + footer.map_size() + FOOTER_SIZE;
        if expected_size != file_size {
            return Err(corrupt(format!(
                "footer describes {} bytes but file has {}",
                expected_size, file_size
            )));
        }
        if footer.physical_data_size > header.chunk_size {
            return Err(corrupt(format!(
                "physical size {} exceeds chunk size {}",
                footer.physical_data_size, header.chunk_size
            )));
        }

        let pos_map = if footer.has_pos_map {
            let bytes = reader.read_absolute(
                HEADER_SIZE + footer.physical_data_size as u64,
                footer.map_size() as usize,
            )?;
            let mut buf = &bytes[..];
            let mut map = Vec::with_capacity(footer.map_count as usize);
            while buf.remaining() >= POS_MAP_ENTRY_SIZE as usize {
                map.push(PosMapEntry::decode_from(&mut buf));
            }
            validate_pos_map(&map, footer.physical_data_size).map_err(corrupt)?;
            Some(map)
        } else {
            if footer.map_count != 0 {
                return Err(corrupt(format!(
                    "{} map entries declared without the map flag",
                    footer.map_count
                )));
            }
            None
        };

        tracing::debug!(
            chunk = header.chunk_number,
            physical = footer.physical_data_size,
            logical = footer.logical_data_size,
            scavenged = pos_map.is_some(),
            "Opened completed chunk"
        );

        let data_end = footer.physical_data_size;
        Ok(Self::assemble(
            path,
            header,
            ChunkMeta {
                state: ChunkState::Completed,
                footer: Some(footer),
                pos_map,
            },
            None,
            reader,
            data_end,
        ))
    }

    fn open_raw(
        path: &Path,
        header: ChunkHeader,
        reader: ChunkReader,
        sync_strategy: SyncStrategy,
    ) -> Result<Self> {
        let capacity = header.chunk_size;
        let full_size = HEADER_SIZE + capacity as u64 + FOOTER_SIZE;

        let writer_file = OpenOptions::new().read(true).write(true).open(path)?;
        if writer_file.metadata()?.len() < full_size {
            writer_file.set_len(full_size)?;
        }

        // Step 1: Walk frames until the first position with no valid frame
        let mut position = 0u32;
        loop {
            match reader.frame_at(position, capacity) {
                Ok(Some(found)) => position += found.size,
                Ok(None) => break,
                Err(AtlasError::CorruptRecord { position: at, reason }) => {
                    // A corrupt frame is only a torn tail when nothing follows it
                    let frame_end = position.saturating_add(reader.read_u32_at(position)? + 8);
                    let followed = reader.frame_at(frame_end, capacity).map_or(true, |f| f.is_some())
                        || !reader.is_zeroed(frame_end.min(capacity), capacity)?;
                    if followed {
                        tracing::error!(
                            chunk = header.chunk_number,
                            position,
                            %reason,
                            "Corrupt record followed by data in raw chunk"
                        );
                        return Err(AtlasError::CorruptRecord {
                            position: at,
                            reason,
                        });
                    }

                    tracing::warn!(
                        chunk = header.chunk_number,
                        position,
                        %reason,
                        "Treating corrupt frame as end of raw chunk"
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        // Step 2: Zero anything a torn append left behind
        let has_torn_tail = position as u64 + 4 <= capacity as u64
            && reader.read_absolute(HEADER_SIZE + position as u64, 4)? != [0u8; 4];
        if has_torn_tail {
            tracing::warn!(
                chunk = header.chunk_number,
                position,
                "Discarding torn record at end of raw chunk"
            );
            writer_file.set_len(HEADER_SIZE + position as u64)?;
            writer_file.set_len(full_size)?;
        }
        writer_file.sync_all()?;

        // Step 3: Rebuild the running checksum for the eventual footer
        let mut hasher = crc32fast::Hasher::new();
        reader.hash_range(0, HEADER_SIZE + position as u64, &mut hasher)?;

        let writer = ChunkWriter::new(writer_file, position, hasher, sync_strategy)?;

        tracing::debug!(chunk = header.chunk_number, position, "Reopened raw chunk");

        Ok(Self::assemble(
            path,
            header,
            ChunkMeta {
                state: ChunkState::Raw,
                footer: None,
                pos_map: None,
            },
            Some(writer),
            reader,
            position,
        ))
    }

    fn assemble(
        path: &Path,
        header: ChunkHeader,
        meta: ChunkMeta,
        writer: Option<ChunkWriter>,
        reader: ChunkReader,
        data_end: u32,
    ) -> Self {
        Self {
            path: path.to_path_buf(),
            header,
            meta: RwLock::new(meta),
            writer: Mutex::new(writer),
            reader: RwLock::new(Some(reader)),
            data_end: AtomicU32::new(data_end),
            delete_on_drop: AtomicBool::new(false),
        }
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Append a record at the current write position
    ///
    /// Returns a failed result (nothing written) when the frame would not fit
    /// in the remaining capacity.
    pub fn try_append(&self, record: &LogRecord) -> Result<RecordWriteResult> {
        let frame = record::encode_record(record)?;

        let mut slot = self.writer.lock();
        let writer = match slot.as_mut() {
            Some(writer) => writer,
            None => return Err(self.not_writable()),
        };

        let old_position = writer.position() as u64;
        if old_position + frame.len() as u64 > self.header.chunk_size as u64 {
            return Ok(RecordWriteResult::failed(old_position));
        }

        writer.append(&frame)?;
        let new_position = writer.position();
        self.data_end.store(new_position, Ordering::Release);

        Ok(RecordWriteResult::successful(old_position, new_position as u64))
    }

    /// Force appended records to durable storage
    pub fn flush(&self) -> Result<()> {
        if let Some(writer) = self.writer.lock().as_mut() {
            writer.sync()?;
        }
        Ok(())
    }

    /// Seal the chunk: write the footer, fsync, become read-only
    ///
    /// Calling this on a chunk that is not raw is an error.
    pub fn complete(&self) -> Result<ChunkFooter> {
        self.seal(None, None)
    }

    /// Seal a scavenge output chunk with its position map
    ///
    /// `logical_data_size` is the size of the original data region the map
    /// translates from.
    pub(crate) fn complete_scavenged(
        &self,
        pos_map: Vec<PosMapEntry>,
        logical_data_size: u64,
    ) -> Result<ChunkFooter> {
        validate_pos_map(&pos_map, self.data_end.load(Ordering::Acquire))
            .map_err(AtlasError::InvalidState)?;
        self.seal(Some(pos_map), Some(logical_data_size))
    }

    fn seal(
        &self,
        pos_map: Option<Vec<PosMapEntry>>,
        logical_data_size: Option<u64>,
    ) -> Result<ChunkFooter> {
        let mut slot = self.writer.lock();
        let writer = match slot.take() {
            Some(writer) => writer,
            None => return Err(self.not_writable()),
        };

        let physical = writer.position();
        let logical = logical_data_size.unwrap_or(physical as u64);
        let footer = writer.finish(pos_map.as_deref(), logical)?;

        let mut meta = self.meta.write();
        meta.state = ChunkState::Completed;
        meta.footer = Some(footer);
        meta.pos_map = pos_map;

        tracing::info!(
            chunk = self.header.chunk_number,
            physical,
            logical,
            map_entries = footer.map_count,
            "Chunk completed"
        );

        Ok(footer)
    }

    fn not_writable(&self) -> AtlasError {
        AtlasError::InvalidState(format!(
            "chunk #{} is {:?} and does not accept writes",
            self.header.chunk_number,
            self.state()
        ))
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Read the record originally written at `position`
    ///
    /// In a scavenged chunk only positions of surviving records resolve.
    pub fn try_read_at(&self, position: u64) -> Result<RecordReadResult> {
        self.with_reader(|meta, reader, data_end| {
            let Some(position) = to_local(position) else {
                return Ok(RecordReadResult::not_found());
            };

            match &meta.pos_map {
                Some(map) => match map.binary_search_by_key(&position, |e| e.old_position) {
                    Ok(idx) => read_mapped(reader, map[idx], data_end, true),
                    Err(_) => Ok(RecordReadResult::not_found()),
                },
                None => read_forward(reader, position, data_end),
            }
        })
    }

    /// Read the physically first record; `next_position` follows it
    pub fn try_read_first(&self) -> Result<RecordReadResult> {
        self.with_reader(|meta, reader, data_end| match &meta.pos_map {
            Some(map) => match map.first() {
                Some(&entry) => read_mapped(reader, entry, data_end, true),
                None => Ok(RecordReadResult::not_found()),
            },
            None => read_forward(reader, 0, data_end),
        })
    }

    /// Read the physically last record; `next_position` is its own start
    pub fn try_read_last(&self) -> Result<RecordReadResult> {
        self.with_reader(|meta, reader, data_end| match &meta.pos_map {
            Some(map) => match map.last() {
                Some(&entry) => read_mapped(reader, entry, data_end, false),
                None => Ok(RecordReadResult::not_found()),
            },
            None => read_backward(reader, data_end, data_end),
        })
    }

    /// Read the first surviving record at or after `position`
    ///
    /// Unscavenged chunks require `position` to be a record boundary.
    pub fn try_read_closest_forward(&self, position: u64) -> Result<RecordReadResult> {
        self.with_reader(|meta, reader, data_end| {
            let Some(position) = to_local(position) else {
                return Ok(RecordReadResult::not_found());
            };

            match &meta.pos_map {
                Some(map) => {
                    let idx = map.partition_point(|e| e.old_position < position);
                    match map.get(idx) {
                        Some(&entry) => read_mapped(reader, entry, data_end, true),
                        None => Ok(RecordReadResult::not_found()),
                    }
                }
                None => read_forward(reader, position, data_end),
            }
        })
    }

    /// Read the last surviving record that starts before `position`
    ///
    /// Unscavenged chunks require `position` to be a record boundary; the
    /// record ending there is returned.
    pub fn try_read_closest_backward(&self, position: u64) -> Result<RecordReadResult> {
        self.with_reader(|meta, reader, data_end| {
            let Some(position) = to_local(position) else {
                return Ok(RecordReadResult::not_found());
            };

            match &meta.pos_map {
                Some(map) => {
                    let idx = map.partition_point(|e| e.old_position < position);
                    if idx == 0 {
                        return Ok(RecordReadResult::not_found());
                    }
                    read_mapped(reader, map[idx - 1], data_end, false)
                }
                None => read_backward(reader, position, data_end),
            }
        })
    }

    /// Forward iterator over every record with its original position
    pub fn iter_records(&self) -> ChunkRecords<'_> {
        ChunkRecords::new(self)
    }

    /// Locate the `index`-th surviving record (scavenged) or the record at
    /// physical `cursor` (unscavenged); `Ok(None)` past the end
    pub(super) fn scan_next(&self, cursor: u32, index: usize) -> Result<Option<ScannedRecord>> {
        self.with_reader(|meta, reader, data_end| {
            let (original_position, physical_position) = match &meta.pos_map {
                Some(map) => match map.get(index) {
                    Some(entry) => (entry.old_position, entry.new_position),
                    None => return Ok(None),
                },
                None if cursor >= data_end => return Ok(None),
                None => (cursor, cursor),
            };

            let found = reader
                .frame_at(physical_position, data_end)?
                .ok_or_else(|| missing_frame(physical_position))?;

            Ok(Some(ScannedRecord {
                original_position: original_position as u64,
                physical_position: physical_position as u64,
                size: found.size,
                record: found.record,
            }))
        })
    }

    fn with_reader<T>(
        &self,
        f: impl FnOnce(&ChunkMeta, &ChunkReader, u32) -> Result<T>,
    ) -> Result<T> {
        let meta = self.meta.read();
        if meta.state == ChunkState::Disposed {
            return Err(AtlasError::InvalidState(format!(
                "chunk #{} is disposed",
                self.header.chunk_number
            )));
        }

        let slot = self.reader.read();
        let reader = slot.as_ref().ok_or_else(|| {
            AtlasError::InvalidState(format!(
                "chunk #{} has no read handle",
                self.header.chunk_number
            ))
        })?;

        let data_end = self.data_end.load(Ordering::Acquire);
        f(&meta, reader, data_end)
    }

    // =========================================================================
    // Integrity & Lifecycle
    // =========================================================================

    /// Recompute the whole-chunk checksum and compare it with the footer
    pub fn verify_checksum(&self) -> Result<()> {
        let meta = self.meta.read();
        let footer = match (meta.state, meta.footer) {
            (ChunkState::Completed, Some(footer)) => footer,
            _ => {
                return Err(AtlasError::InvalidState(format!(
                    "chunk #{} is not completed",
                    self.header.chunk_number
                )))
            }
        };

        let slot = self.reader.read();
        let reader = slot.as_ref().ok_or_else(|| {
            AtlasError::InvalidState(format!(
                "chunk #{} has no read handle",
                self.header.chunk_number
            ))
        })?;

        let covered =
            HEADER_SIZE + footer.physical_data_size as u64 + footer.map_size() + FOOTER_SIZE - 4;
        let mut hasher = crc32fast::Hasher::new();
        reader.hash_range(0, covered, &mut hasher)?;

        let computed = hasher.finalize();
        if computed != footer.checksum {
            return Err(AtlasError::CorruptChunk {
                path: self.path.display().to_string(),
                reason: format!(
                    "checksum mismatch: footer {:08x}, computed {:08x}",
                    footer.checksum, computed
                ),
            });
        }
        Ok(())
    }

    /// Release file handles; every later operation fails
    pub fn dispose(&self) -> Result<()> {
        let writer = self.writer.lock().take();
        self.meta.write().state = ChunkState::Disposed;
        self.reader.write().take();

        if let Some(writer) = writer {
            writer.close()?;
        }
        Ok(())
    }

    /// Remove the file once the last handle to this chunk is dropped
    pub fn mark_for_deletion(&self) {
        self.delete_on_drop.store(true, Ordering::Release);
        tracing::debug!(
            chunk = self.header.chunk_number,
            path = %self.path.display(),
            "Chunk marked for deletion"
        );
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn header(&self) -> &ChunkHeader {
        &self.header
    }

    pub fn chunk_number(&self) -> u32 {
        self.header.chunk_number
    }

    pub fn chunk_size(&self) -> u32 {
        self.header.chunk_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> ChunkState {
        self.meta.read().state
    }

    pub fn is_completed(&self) -> bool {
        self.state() == ChunkState::Completed
    }

    /// Whether this chunk is the output of a scavenge (carries a position map)
    pub fn is_scavenged(&self) -> bool {
        self.meta.read().pos_map.is_some()
    }

    pub fn footer(&self) -> Option<ChunkFooter> {
        self.meta.read().footer
    }

    /// Physical bytes of record data (the write position while raw)
    pub fn physical_data_size(&self) -> u64 {
        self.data_end.load(Ordering::Acquire) as u64
    }

    /// Bytes of the original log this chunk accounts for
    pub fn logical_data_size(&self) -> u64 {
        match self.footer() {
            Some(footer) => footer.logical_data_size,
            None => self.physical_data_size(),
        }
    }

    /// Data plus position map bytes, the size compared when scavenging
    pub fn occupied_size(&self) -> u64 {
        let map_size = self.footer().map(|f| f.map_size()).unwrap_or(0);
        self.physical_data_size() + map_size
    }

    pub fn pos_map_len(&self) -> usize {
        self.meta.read().pos_map.as_ref().map_or(0, |m| m.len())
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        if !self.delete_on_drop.load(Ordering::Acquire) {
            return;
        }

        // Close handles before unlinking
        self.writer.get_mut().take();
        self.reader.get_mut().take();

        match fs::remove_file(&self.path) {
            Ok(()) => tracing::info!(
                chunk = self.header.chunk_number,
                path = %self.path.display(),
                "Deleted replaced chunk file"
            ),
            Err(e) => tracing::warn!(
                chunk = self.header.chunk_number,
                path = %self.path.display(),
                error = %e,
                "Failed to delete replaced chunk file"
            ),
        }
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

fn to_local(position: u64) -> Option<u32> {
    u32::try_from(position).ok()
}

fn missing_frame(position: u32) -> AtlasError {
    AtlasError::CorruptRecord {
        position: position as u64,
        reason: "expected a record frame".to_string(),
    }
}

fn read_forward(reader: &ChunkReader, position: u32, data_end: u32) -> Result<RecordReadResult> {
    Ok(match reader.frame_at(position, data_end)? {
        Some(PhysicalRecord { start, size, record }) => {
            RecordReadResult::found(record, (start + size) as u64)
        }
        None => RecordReadResult::not_found(),
    })
}

fn read_backward(reader: &ChunkReader, end: u32, data_end: u32) -> Result<RecordReadResult> {
    Ok(match reader.frame_ending_at(end, data_end)? {
        Some(PhysicalRecord { start, record, .. }) => RecordReadResult::found(record, start as u64),
        None => RecordReadResult::not_found(),
    })
}

/// Read a surviving record; positions reported are original ones
fn read_mapped(
    reader: &ChunkReader,
    entry: PosMapEntry,
    data_end: u32,
    forward: bool,
) -> Result<RecordReadResult> {
    let found = reader
        .frame_at(entry.new_position, data_end)?
        .ok_or_else(|| missing_frame(entry.new_position))?;

    let next_position = if forward {
        entry.old_position as u64 + found.size as u64
    } else {
        entry.old_position as u64
    };
    Ok(RecordReadResult::found(found.record, next_position))
}

/// Scavenging never reorders records: both axes strictly increase
fn validate_pos_map(map: &[PosMapEntry], physical_data_size: u32) -> std::result::Result<(), String> {
    for pair in map.windows(2) {
        if pair[1].old_position <= pair[0].old_position
            || pair[1].new_position <= pair[0].new_position
        {
            return Err(format!(
                "position map is not strictly increasing at {:?} -> {:?}",
                pair[0], pair[1]
            ));
        }
    }
    if let Some(last) = map.last() {
        if last.new_position >= physical_data_size {
            return Err(format!(
                "position map entry {:?} points past data end {}",
                last, physical_data_size
            ));
        }
    }
    Ok(())
}
