//! Chunk Manager
//!
//! Owns the ordered table of chunks that make up the log.
//!
//! ## Responsibilities
//! - Discover existing chunk files on startup
//! - Map global log positions to chunks
//! - Append to the active chunk, rolling over to a new one when full
//! - Swap in scavenged chunk files and announce the replacement
//!
//! ## File Naming
//! ```text
//! chunk-{number:06}.{version:06}                  live chunk file
//! chunk-{number:06}.{version:06}.scavenge.tmp     scavenge output in progress
//! ```
//! Each scavenge bumps the version; only the highest version of a number is
//! live, older ones are leftovers of an interrupted replacement.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::chunk::{Chunk, RecordWriteResult};
use crate::config::Config;
use crate::error::{AtlasError, Result};
use crate::record::LogRecord;

/// Suffix of scavenge output files not yet swapped in
pub(crate) const TEMP_SUFFIX: &str = ".scavenge.tmp";

/// Notification about a change to the chunk table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkEvent {
    /// A new raw chunk became active
    Added { chunk_number: u32 },

    /// A chunk was sealed
    Completed { chunk_number: u32 },

    /// A chunk's file was replaced by its scavenged copy
    Replaced {
        chunk_number: u32,
        old_path: PathBuf,
        new_path: PathBuf,
    },
}

/// A chunk and the file version currently backing it
struct ChunkSlot {
    chunk: Arc<Chunk>,
    version: u32,
}

/// Manages the chunks of one log
///
/// ## Concurrency:
/// - `chunks`: Protected by RwLock (lookups share it, add/switch take it exclusively)
/// - `write_lock`: Serializes `write` and roll-over (single writer)
/// - `scavenge_lock`: One scavenge pass at a time
/// - `switch_lock`: One `switch_chunk` at a time; the table lock is only
///   taken for the final swap, never across file system calls
/// - Readers clone the `Arc<Chunk>` out of the table, so a concurrent switch
///   never invalidates a read in flight
pub struct ChunkManager {
    config: Config,

    /// Index = chunk number
    chunks: RwLock<Vec<ChunkSlot>>,

    subscribers: Mutex<Vec<Sender<ChunkEvent>>>,

    write_lock: Mutex<()>,

    scavenge_lock: Mutex<()>,

    switch_lock: Mutex<()>,
}

impl ChunkManager {
    /// Open or create the log in `config.data_dir`
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Remove unfinished scavenge outputs
    /// 3. Keep the highest version of each chunk number, delete the rest
    /// 4. Open every chunk (numbers must be contiguous from 0)
    /// 5. Make sure a raw chunk is available for writing
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let dir = config.data_dir.clone();

        // Step 1: Create directory if it doesn't exist
        fs::create_dir_all(&dir)?;

        // Step 2 + 3: Discover chunk files
        let mut discovered: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_path = entry.path();
            if !file_path.is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(TEMP_SUFFIX) {
                tracing::warn!(file = %name, "Removing unfinished scavenge output");
                fs::remove_file(&file_path)?;
                continue;
            }

            if let Some((number, version)) = Self::parse_chunk_name(&name) {
                discovered.entry(number).or_default().push(version);
            }
        }

        // Step 4: Open chunks in order
        let mut slots = Vec::with_capacity(discovered.len());
        for (expected, (number, mut versions)) in discovered.into_iter().enumerate() {
            if number != expected as u32 {
                return Err(AtlasError::CorruptChunk {
                    path: dir.display().to_string(),
                    reason: format!("chunk #{} is missing", expected),
                });
            }

            versions.sort_unstable();
            let Some(version) = versions.pop() else {
                continue;
            };
            for stale in versions {
                let stale_path = Self::chunk_path_with_dir(&dir, number, stale);
                tracing::info!(path = %stale_path.display(), "Removing superseded chunk version");
                fs::remove_file(&stale_path)?;
            }

            let path = Self::chunk_path_with_dir(&dir, number, version);
            let chunk = Chunk::open_existing(&path, config.sync_strategy)?;
            Self::check_opened(&config, &chunk, number)?;

            slots.push(ChunkSlot {
                chunk: Arc::new(chunk),
                version,
            });
        }

        if let Some((_, init)) = slots.split_last() {
            if let Some(raw) = init.iter().find(|s| !s.chunk.is_completed()) {
                return Err(AtlasError::CorruptChunk {
                    path: raw.chunk.path().display().to_string(),
                    reason: "only the last chunk may be incomplete".to_string(),
                });
            }
        }

        let needs_new_chunk = slots.last().map_or(true, |s| s.chunk.is_completed());

        tracing::info!(
            data_dir = %dir.display(),
            chunks = slots.len(),
            "Opened chunk manager"
        );

        let manager = Self {
            config,
            chunks: RwLock::new(slots),
            subscribers: Mutex::new(Vec::new()),
            write_lock: Mutex::new(()),
            scavenge_lock: Mutex::new(()),
            switch_lock: Mutex::new(()),
        };

        // Step 5: Make sure there's somewhere to write
        if needs_new_chunk {
            manager.add_new_chunk()?;
        }

        Ok(manager)
    }

    fn check_opened(config: &Config, chunk: &Chunk, number: u32) -> Result<()> {
        if chunk.chunk_number() != number {
            return Err(AtlasError::CorruptChunk {
                path: chunk.path().display().to_string(),
                reason: format!(
                    "header says chunk #{}, file name says #{}",
                    chunk.chunk_number(),
                    number
                ),
            });
        }

        if chunk.chunk_size() != config.chunk_size {
            return Err(AtlasError::Config(format!(
                "chunk #{} has size {}, configured size is {}",
                number,
                chunk.chunk_size(),
                config.chunk_size
            )));
        }

        if config.verify_checksums && chunk.is_completed() {
            chunk.verify_checksum()?;
        }

        Ok(())
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Get the current chunk for a chunk number
    pub fn get_chunk(&self, chunk_number: u32) -> Option<Arc<Chunk>> {
        self.chunks
            .read()
            .get(chunk_number as usize)
            .map(|slot| Arc::clone(&slot.chunk))
    }

    /// Get the chunk covering a global log position
    pub fn get_chunk_for(&self, log_position: u64) -> Result<Arc<Chunk>> {
        let number = log_position / self.config.chunk_size as u64;
        u32::try_from(number)
            .ok()
            .and_then(|n| self.get_chunk(n))
            .ok_or(AtlasError::PositionNotFound(log_position))
    }

    /// The raw chunk currently receiving appends
    pub fn active_chunk(&self) -> Result<Arc<Chunk>> {
        self.chunks
            .read()
            .last()
            .map(|slot| Arc::clone(&slot.chunk))
            .ok_or_else(|| AtlasError::InvalidState("chunk manager has no chunks".to_string()))
    }

    /// All sealed chunks, ordered by chunk number
    pub fn completed_chunks(&self) -> Vec<Arc<Chunk>> {
        self.chunks
            .read()
            .iter()
            .filter(|slot| slot.chunk.is_completed())
            .map(|slot| Arc::clone(&slot.chunk))
            .collect()
    }

    /// Get the number of chunks
    pub fn chunks_count(&self) -> usize {
        self.chunks.read().len()
    }

    /// File version currently backing a chunk number
    pub fn chunk_version(&self, chunk_number: u32) -> Option<u32> {
        self.chunks
            .read()
            .get(chunk_number as usize)
            .map(|slot| slot.version)
    }

    /// Global position where the next record will be written
    pub fn write_position(&self) -> Result<u64> {
        let active = self.active_chunk()?;
        Ok(active.header().chunk_start_position() + active.physical_data_size())
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Append a record to the active chunk
    ///
    /// Positions in the result are global. When the record doesn't fit, the
    /// active chunk is completed, a new one is added, and a failed result is
    /// returned whose `new_position` is the new chunk's start: the caller
    /// rebuilds the record at that position and writes again.
    pub fn write(&self, record: &LogRecord) -> Result<RecordWriteResult> {
        let _write_guard = self.write_lock.lock();

        let active = self.active_chunk()?;
        let start = active.header().chunk_start_position();

        let result = active.try_append(record)?;
        if result.success {
            return Ok(RecordWriteResult::successful(
                start + result.old_position,
                start + result.new_position,
            ));
        }

        // Doesn't even fit an empty chunk: rolling over would loop forever
        if active.physical_data_size() == 0 {
            return Err(AtlasError::CapacityExceeded {
                record_size: record.frame_size()? as u64,
                chunk_size: self.config.chunk_size as u64,
            });
        }

        let next = self.complete_and_add_locked(&active)?;
        let next_start = next.header().chunk_start_position();

        tracing::debug!(
            from_chunk = active.chunk_number(),
            to_chunk = next.chunk_number(),
            next_start,
            "Active chunk full, rolled over"
        );

        Ok(RecordWriteResult {
            success: false,
            old_position: start + result.old_position,
            new_position: next_start,
        })
    }

    /// Seal the active chunk and start a new one
    pub fn complete_active_and_add_new(&self) -> Result<Arc<Chunk>> {
        let _write_guard = self.write_lock.lock();
        let active = self.active_chunk()?;
        self.complete_and_add_locked(&active)
    }

    /// Called with `write_lock` held
    fn complete_and_add_locked(&self, active: &Chunk) -> Result<Arc<Chunk>> {
        active.complete()?;
        self.emit(ChunkEvent::Completed {
            chunk_number: active.chunk_number(),
        });
        self.add_new_chunk()
    }

    /// Create the next raw chunk and make it active
    fn add_new_chunk(&self) -> Result<Arc<Chunk>> {
        // Only the single writer (or `open`) grows the table
        let number = self.chunks.read().len() as u32;
        let path = self.chunk_path(number, 0);
        let chunk = Arc::new(Chunk::create_new(
            &path,
            number,
            self.config.chunk_size,
            self.config.sync_strategy,
        )?);
        sync_dir(&self.config.data_dir)?;

        self.chunks.write().push(ChunkSlot {
            chunk: Arc::clone(&chunk),
            version: 0,
        });

        tracing::info!(chunk = number, "Added new chunk");
        self.emit(ChunkEvent::Added {
            chunk_number: number,
        });

        Ok(chunk)
    }

    /// Force the active chunk to durable storage
    pub fn flush(&self) -> Result<()> {
        self.active_chunk()?.flush()
    }

    // =========================================================================
    // Scavenge Support
    // =========================================================================

    /// Held for the duration of a scavenge pass
    pub(crate) fn lock_scavenge(&self) -> MutexGuard<'_, ()> {
        self.scavenge_lock.lock()
    }

    /// Where scavenge output for a chunk is written before the switch
    pub(crate) fn scavenge_temp_path(&self, chunk_number: u32) -> Result<PathBuf> {
        let version = self.chunk_version(chunk_number).ok_or_else(|| {
            AtlasError::InvalidState(format!("chunk #{} does not exist", chunk_number))
        })?;
        let final_path = self.chunk_path(chunk_number, version + 1);
        let mut name = final_path.into_os_string();
        name.push(TEMP_SUFFIX);
        Ok(PathBuf::from(name))
    }

    /// Replace a completed chunk with a fully written scavenge output
    ///
    /// The temp file is durably renamed to the next version, reopened, and
    /// swapped into the table. The previous chunk is marked for deletion; its
    /// file disappears once every reader holding it lets go.
    pub fn switch_chunk(&self, chunk_number: u32, temp_path: &Path) -> Result<Arc<Chunk>> {
        let _switch_guard = self.switch_lock.lock();

        // Step 1: Validate against a snapshot; only switches change a slot
        let (current, version) = {
            let chunks = self.chunks.read();
            let slot = chunks.get(chunk_number as usize).ok_or_else(|| {
                AtlasError::InvalidState(format!("chunk #{} does not exist", chunk_number))
            })?;
            (Arc::clone(&slot.chunk), slot.version)
        };
        if !current.is_completed() {
            return Err(AtlasError::InvalidState(format!(
                "chunk #{} is not completed and cannot be replaced",
                chunk_number
            )));
        }
        drop(current);

        // Step 2: File system work, with readers still served from the table
        let new_version = version + 1;
        let new_path = Self::chunk_path_with_dir(&self.config.data_dir, chunk_number, new_version);
        fs::rename(temp_path, &new_path)?;
        sync_dir(&self.config.data_dir)?;

        let replacement = match self.open_replacement(&new_path, chunk_number) {
            Ok(chunk) => Arc::new(chunk),
            Err(e) => {
                // Never leave an unusable newest version for the next open
                if let Err(remove_err) = fs::remove_file(&new_path) {
                    tracing::warn!(path = %new_path.display(), error = %remove_err, "Failed to remove rejected replacement");
                }
                return Err(e);
            }
        };

        // Step 3: Swap under the table lock
        let old = {
            let mut chunks = self.chunks.write();
            let slot = &mut chunks[chunk_number as usize];
            slot.version = new_version;
            std::mem::replace(&mut slot.chunk, Arc::clone(&replacement))
        };

        let old_path = old.path().to_path_buf();
        old.mark_for_deletion();
        drop(old);

        tracing::info!(
            chunk = chunk_number,
            version = new_version,
            path = %new_path.display(),
            "Switched chunk to scavenged version"
        );
        self.emit(ChunkEvent::Replaced {
            chunk_number,
            old_path,
            new_path,
        });

        Ok(replacement)
    }

    fn open_replacement(&self, path: &Path, chunk_number: u32) -> Result<Chunk> {
        let chunk = Chunk::open_existing(path, self.config.sync_strategy)?;
        Self::check_opened(&self.config, &chunk, chunk_number)?;
        if !chunk.is_completed() {
            return Err(AtlasError::InvalidState(format!(
                "replacement for chunk #{} is not completed",
                chunk_number
            )));
        }
        Ok(chunk)
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Receive every future change to the chunk table
    pub fn subscribe(&self) -> Receiver<ChunkEvent> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    fn emit(&self, event: ChunkEvent) {
        // Drop subscribers whose receiver is gone
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    // =========================================================================
    // Shutdown & Accessors
    // =========================================================================

    /// Sync the active chunk and release every chunk's handles
    pub fn close(self) -> Result<()> {
        self.flush()?;
        for slot in self.chunks.read().iter() {
            slot.chunk.dispose()?;
        }
        tracing::info!(data_dir = %self.config.data_dir.display(), "Closed chunk manager");
        Ok(())
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn chunk_path(&self, number: u32, version: u32) -> PathBuf {
        Self::chunk_path_with_dir(&self.config.data_dir, number, version)
    }

    /// Generate chunk path given a directory, number and version
    fn chunk_path_with_dir(dir: &Path, number: u32, version: u32) -> PathBuf {
        dir.join(format!("chunk-{:06}.{:06}", number, version))
    }

    /// Parse number and version from a file name
    /// "chunk-000042.000003" → Some((42, 3))
    fn parse_chunk_name(name: &str) -> Option<(u32, u32)> {
        let rest = name.strip_prefix("chunk-")?;
        let (number, version) = rest.split_once('.')?;
        Some((number.parse().ok()?, version.parse().ok()?))
    }
}

/// Make renames and creations in `dir` durable
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
