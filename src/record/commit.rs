//! Commit records

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Marks the prepares starting at `transaction_position` as committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitLogRecord {
    pub log_position: u64,
    pub transaction_position: u64,
    /// Event number assigned to the transaction's first event
    pub first_event_number: i64,
    pub correlation_id: Uuid,
    /// Unix millis
    pub timestamp: u64,
}

impl CommitLogRecord {
    pub fn new(
        log_position: u64,
        correlation_id: Uuid,
        transaction_position: u64,
        first_event_number: i64,
    ) -> Self {
        Self {
            log_position,
            transaction_position,
            first_event_number,
            correlation_id,
            timestamp: super::now_millis(),
        }
    }
}
