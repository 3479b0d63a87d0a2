//! Configuration for AtlasLog
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::chunk::{FOOTER_SIZE, HEADER_SIZE};
use crate::error::{AtlasError, Result};
use crate::record::MIN_RECORD_LENGTH;

/// Main configuration for an AtlasLog database
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all chunk files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── chunk-000000.000000
    ///     ├── chunk-000001.000002   (scavenged twice)
    ///     └── chunk-000002.000000   (active)
    pub data_dir: PathBuf,

    /// Capacity of a chunk's data region (in bytes)
    pub chunk_size: u32,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the active chunk
    pub sync_strategy: SyncStrategy,

    /// Verify the whole-chunk checksum of every completed chunk on open
    pub verify_checksums: bool,

    // -------------------------------------------------------------------------
    // Scavenge Configuration
    // -------------------------------------------------------------------------
    /// Replace a chunk with its scavenged copy even when nothing was saved
    pub always_keep_scavenged: bool,
}

/// Chunk sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every append (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced records (balanced durability/performance)
    EveryNRecords { count: usize },

    /// fsync only when the chunk is completed (scavenge output)
    OnComplete,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./atlaslog_data"),
            chunk_size: 256 * 1024 * 1024, // 256 MB
            sync_strategy: SyncStrategy::EveryNRecords { count: 100 },
            verify_checksums: false,
            always_keep_scavenged: false,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that the values can be expressed in the on-disk format
    pub fn validate(&self) -> Result<()> {
        // Smallest frame: both length fields around a minimal record
        if self.chunk_size < MIN_RECORD_LENGTH + 8 {
            return Err(AtlasError::Config(format!(
                "chunk_size {} cannot hold a single record frame",
                self.chunk_size
            )));
        }

        let file_size = HEADER_SIZE + self.chunk_size as u64 + FOOTER_SIZE;
        if file_size > u32::MAX as u64 {
            return Err(AtlasError::Config(format!(
                "chunk_size {} exceeds the 32-bit chunk file layout",
                self.chunk_size
            )));
        }

        if let SyncStrategy::EveryNRecords { count: 0 } = self.sync_strategy {
            return Err(AtlasError::Config(
                "EveryNRecords sync strategy needs a non-zero count".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all chunk files)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the data-region capacity of each chunk (in bytes)
    pub fn chunk_size(mut self, size: u32) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Verify completed chunk checksums when opening
    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.config.verify_checksums = verify;
        self
    }

    /// Keep scavenged chunks even if they are not smaller
    pub fn always_keep_scavenged(mut self, keep: bool) -> Self {
        self.config.always_keep_scavenged = keep;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
