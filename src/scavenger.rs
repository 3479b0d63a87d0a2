//! Scavenger
//!
//! Compacts completed chunks by dropping records the discard policy no
//! longer needs.
//!
//! ## Per-chunk pass
//! ```text
//!   source chunk (completed)            scavenge output (.scavenge.tmp)
//!   ┌────┬────┬────┬────┐               ┌────┬────┬──────────────┐
//!   │ r1 │ r2 │ r3 │ r4 │  ── keep? ──► │ r1 │ r3 │ PosMap       │
//!   └────┴────┴────┴────┘               └────┴────┴──────────────┘
//!     0    a    b    c                    0    a'   (0→0),(b→a')
//! ```
//! The output replaces the source when it occupies less space (data plus
//! map) or when `always_keep_scavenged` is set; otherwise it is deleted and
//! the source stays byte-identical.
//!
//! Map entries always use the record's original local position, so a chunk
//! can be scavenged any number of times without breaking old positions.

use std::fs;
use std::path::Path;

use crate::chunk::{Chunk, PosMapEntry};
use crate::config::SyncStrategy;
use crate::error::{AtlasError, Result};
use crate::manager::ChunkManager;
use crate::record::LogRecord;

/// Decides which stream's records may be dropped
///
/// Must answer consistently for the duration of one scavenge pass.
pub trait DiscardPolicy {
    fn should_discard(&self, stream_id: &str) -> bool;
}

impl<F> DiscardPolicy for F
where
    F: Fn(&str) -> bool,
{
    fn should_discard(&self, stream_id: &str) -> bool {
        self(stream_id)
    }
}

/// Outcome of scavenging one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkScavengeResult {
    pub chunk_number: u32,
    pub records_kept: usize,
    pub records_discarded: usize,
    /// Occupied bytes (data + map) before
    pub old_size: u64,
    /// Occupied bytes (data + map) of the scavenge output
    pub new_size: u64,
    /// Whether the output replaced the source
    pub replaced: bool,
}

impl ChunkScavengeResult {
    /// Bytes saved by this pass (0 when the source was kept)
    pub fn space_saved(&self) -> u64 {
        if self.replaced {
            self.old_size.saturating_sub(self.new_size)
        } else {
            0
        }
    }
}

/// Outcome of scavenging every completed chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScavengeSummary {
    pub chunks: Vec<ChunkScavengeResult>,
}

impl ScavengeSummary {
    pub fn space_saved(&self) -> u64 {
        self.chunks.iter().map(|c| c.space_saved()).sum()
    }

    pub fn chunks_replaced(&self) -> usize {
        self.chunks.iter().filter(|c| c.replaced).count()
    }
}

/// Rewrites completed chunks of a `ChunkManager`
pub struct Scavenger<'a, P: DiscardPolicy> {
    manager: &'a ChunkManager,
    policy: P,
    always_keep_scavenged: bool,
}

impl<'a, P: DiscardPolicy> Scavenger<'a, P> {
    /// Create a scavenger using the manager's `always_keep_scavenged` setting
    pub fn new(manager: &'a ChunkManager, policy: P) -> Self {
        Self {
            manager,
            policy,
            always_keep_scavenged: manager.config().always_keep_scavenged,
        }
    }

    /// Override the configured `always_keep_scavenged`
    pub fn always_keep_scavenged(mut self, always_keep: bool) -> Self {
        self.always_keep_scavenged = always_keep;
        self
    }

    /// Scavenge every completed chunk in chunk number order
    pub fn scavenge(&self) -> Result<ScavengeSummary> {
        let _scavenge_guard = self.manager.lock_scavenge();

        let mut summary = ScavengeSummary::default();
        for chunk in self.manager.completed_chunks() {
            summary.chunks.push(self.scavenge_locked(&chunk)?);
        }

        tracing::info!(
            chunks = summary.chunks.len(),
            replaced = summary.chunks_replaced(),
            space_saved = summary.space_saved(),
            "Scavenge finished"
        );

        Ok(summary)
    }

    /// Scavenge a single completed chunk
    pub fn scavenge_chunk(&self, chunk_number: u32) -> Result<ChunkScavengeResult> {
        let _scavenge_guard = self.manager.lock_scavenge();

        let chunk = self.manager.get_chunk(chunk_number).ok_or_else(|| {
            AtlasError::InvalidState(format!("chunk #{} does not exist", chunk_number))
        })?;
        if !chunk.is_completed() {
            return Err(AtlasError::InvalidState(format!(
                "chunk #{} is not completed and cannot be scavenged",
                chunk_number
            )));
        }

        self.scavenge_locked(&chunk)
    }

    /// Called with the manager's scavenge lock held
    fn scavenge_locked(&self, source: &Chunk) -> Result<ChunkScavengeResult> {
        let chunk_number = source.chunk_number();
        let temp_path = self.manager.scavenge_temp_path(chunk_number)?;

        tracing::debug!(
            chunk = chunk_number,
            temp = %temp_path.display(),
            "Scavenging chunk"
        );

        // Leftover from a pass that died mid-write
        if temp_path.exists() {
            fs::remove_file(&temp_path)?;
        }

        let built = match self.build_output(source, &temp_path) {
            Ok(built) => built,
            Err(e) => {
                discard_output(&temp_path);
                tracing::warn!(chunk = chunk_number, error = %e, "Scavenge aborted");
                return Err(AtlasError::ScavengeAborted {
                    chunk_number,
                    reason: e.to_string(),
                });
            }
        };

        let old_size = source.occupied_size();
        let mut result = ChunkScavengeResult {
            chunk_number,
            records_kept: built.kept,
            records_discarded: built.discarded,
            old_size,
            new_size: built.occupied_size,
            replaced: false,
        };

        // Step 4: Keep or throw away the output
        if built.occupied_size < old_size || self.always_keep_scavenged {
            if let Err(e) = self.manager.switch_chunk(chunk_number, &temp_path) {
                discard_output(&temp_path);
                return Err(AtlasError::ScavengeAborted {
                    chunk_number,
                    reason: e.to_string(),
                });
            }
            result.replaced = true;
        } else {
            discard_output(&temp_path);
        }

        tracing::info!(
            chunk = chunk_number,
            kept = result.records_kept,
            discarded = result.records_discarded,
            old_size = result.old_size,
            new_size = result.new_size,
            replaced = result.replaced,
            "Chunk scavenged"
        );

        Ok(result)
    }

    /// Write survivors of `source` into a completed chunk at `temp_path`
    fn build_output(&self, source: &Chunk, temp_path: &Path) -> Result<BuiltOutput> {
        // Step 1: Destination with the same identity and capacity
        let output = Chunk::create_new(
            temp_path,
            source.chunk_number(),
            source.chunk_size(),
            SyncStrategy::OnComplete,
        )?;

        // Step 2: Copy survivors, mapping original → new position
        let mut pos_map = Vec::new();
        let mut discarded = 0usize;
        for scanned in source.iter_records() {
            let scanned = scanned?;
            if self.is_discardable(&scanned.record) {
                discarded += 1;
                continue;
            }

            let written = output.try_append(&scanned.record)?;
            if !written.success {
                return Err(AtlasError::InvalidState(format!(
                    "record at {} does not fit the scavenge output",
                    scanned.original_position
                )));
            }
            pos_map.push(PosMapEntry::new(
                scanned.original_position as u32,
                written.old_position as u32,
            ));
        }

        // Step 3: Seal with the map, keeping the source's logical extent
        let kept = pos_map.len();
        output.complete_scavenged(pos_map, source.logical_data_size())?;
        let occupied_size = output.occupied_size();
        output.dispose()?;

        Ok(BuiltOutput {
            kept,
            discarded,
            occupied_size,
        })
    }

    fn is_discardable(&self, record: &LogRecord) -> bool {
        match record {
            LogRecord::Prepare(prepare) => self.policy.should_discard(&prepare.event_stream_id),
            LogRecord::Commit(_) | LogRecord::System(_) => false,
        }
    }
}

struct BuiltOutput {
    kept: usize,
    discarded: usize,
    occupied_size: u64,
}

fn discard_output(temp_path: &Path) {
    if let Err(e) = fs::remove_file(temp_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %temp_path.display(), error = %e, "Failed to remove scavenge output");
        }
    }
}
