//! Transfer history sink

use std::collections::VecDeque;
use std::sync::Mutex;

use peerdrop_common::types::TransferRecord;

use crate::config::DEFAULT_HISTORY_LIMIT;

/// Receives finished transfer records for storage
pub trait TransferHistory: Send + Sync {
    fn record(&self, record: TransferRecord);
}

/// In-memory history keeping the most recent records
///
/// Records are returned newest first; once the limit is reached the oldest
/// record is discarded.
#[derive(Debug)]
pub struct MemoryHistory {
    records: Mutex<VecDeque<TransferRecord>>,
    limit: usize,
}

impl MemoryHistory {
    /// Create a history with the default retention
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Create a history keeping at most `limit` records
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            limit,
        }
    }

    /// Copy of the stored records, newest first
    pub fn records(&self) -> Vec<TransferRecord> {
        self.records
            .lock()
            .expect("history lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Remove every stored record
    pub fn clear(&self) {
        self.records.lock().expect("history lock poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("history lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferHistory for MemoryHistory {
    fn record(&self, record: TransferRecord) {
        let mut records = self.records.lock().expect("history lock poisoned");
        records.push_front(record);
        records.truncate(self.limit);
    }
}
