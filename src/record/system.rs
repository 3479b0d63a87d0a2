//! System records

use serde::{Deserialize, Serialize};

/// Kinds of internal records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemRecordKind {
    /// Start of a new writer epoch
    Epoch,
}

/// Record written by the database itself rather than a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemLogRecord {
    pub log_position: u64,
    /// Unix millis
    pub timestamp: u64,
    pub kind: SystemRecordKind,
    pub data: Vec<u8>,
}

impl SystemLogRecord {
    pub fn new(log_position: u64, kind: SystemRecordKind, data: impl Into<Vec<u8>>) -> Self {
        Self {
            log_position,
            timestamp: super::now_millis(),
            kind,
            data: data.into(),
        }
    }
}
