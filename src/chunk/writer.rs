//! Chunk Writer
//!
//! Append side of a raw chunk. Frames go straight after the header; the
//! footer (and position map, for scavenged chunks) is written by `finish`.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};

use bytes::BytesMut;

use crate::config::SyncStrategy;
use crate::error::{AtlasError, Result};

use super::{ChunkFooter, PosMapEntry, FOOTER_SIZE, HEADER_SIZE, POS_MAP_ENTRY_SIZE};

/// Writes frames into a raw chunk file
pub(super) struct ChunkWriter {
    /// Buffered writer positioned at the end of the written data
    file: BufWriter<File>,
    /// Local position where the next frame goes
    position: u32,
    /// Running CRC over header + data written so far
    hasher: crc32fast::Hasher,
    sync_strategy: SyncStrategy,
    /// Frames written since the last fsync
    unsynced: usize,
}

impl ChunkWriter {
    /// Wrap a file whose header and first `position` data bytes are already
    /// on disk and covered by `hasher`
    pub(super) fn new(
        mut file: File,
        position: u32,
        hasher: crc32fast::Hasher,
        sync_strategy: SyncStrategy,
    ) -> Result<Self> {
        file.seek(SeekFrom::Start(HEADER_SIZE + position as u64))?;
        Ok(Self {
            file: BufWriter::new(file),
            position,
            hasher,
            sync_strategy,
            unsynced: 0,
        })
    }

    pub(super) fn position(&self) -> u32 {
        self.position
    }

    /// Write one complete frame and make it visible to other file handles
    pub(super) fn append(&mut self, frame: &[u8]) -> Result<()> {
        self.file.write_all(frame)?;
        self.file.flush()?;

        self.hasher.update(frame);
        self.position += frame.len() as u32;
        self.unsynced += 1;

        let should_sync = match self.sync_strategy {
            SyncStrategy::EveryWrite => true,
            SyncStrategy::EveryNRecords { count } => self.unsynced >= count,
            SyncStrategy::OnComplete => false,
        };
        if should_sync {
            self.sync()?;
        }

        Ok(())
    }

    /// Force written frames to durable storage
    pub(super) fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Seal the chunk: write the map and footer, trim the file, fsync
    ///
    /// `pos_map` is `Some` for scavenged chunks (possibly empty) and must
    /// already be ordered by `old_position`.
    pub(super) fn finish(
        mut self,
        pos_map: Option<&[PosMapEntry]>,
        logical_data_size: u64,
    ) -> Result<ChunkFooter> {
        let has_pos_map = pos_map.is_some();
        let pos_map = pos_map.unwrap_or(&[]);

        let mut map_bytes = BytesMut::with_capacity(pos_map.len() * POS_MAP_ENTRY_SIZE as usize);
        for entry in pos_map {
            entry.encode_into(&mut map_bytes);
        }
        self.file.write_all(&map_bytes)?;
        self.hasher.update(&map_bytes);

        let mut footer = ChunkFooter {
            is_completed: true,
            has_pos_map,
            physical_data_size: self.position,
            logical_data_size,
            map_count: pos_map.len() as u32,
            checksum: 0,
        };
        let prefix = footer.prefix_bytes();
        self.hasher.update(&prefix);
        footer.checksum = self.hasher.clone().finalize();

        self.file.write_all(&footer.to_bytes())?;
        self.file.flush()?;

        let file = self.file.into_inner().map_err(|e| {
            AtlasError::InvalidState(format!("Failed to flush chunk footer: {}", e))
        })?;

        let file_size = HEADER_SIZE + self.position as u64 + footer.map_size() + FOOTER_SIZE;
        file.set_len(file_size)?;
        file.sync_all()?;

        Ok(footer)
    }

    /// Flush buffered bytes without sealing (used on dispose)
    pub(super) fn close(mut self) -> Result<()> {
        self.sync()
    }
}
