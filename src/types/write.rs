//! Values produced by a document write

use serde::Serialize;

/// A byte that has been written to the store, tagged with its offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistedByte {
    pub offset: u64,
    pub value: u8,
}

/// Outcome of a successful write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    /// Store offset of the first byte written
    pub start_offset: u64,
    /// Number of bytes persisted
    pub bytes_written: u64,
    /// Unix timestamp (milliseconds) when the write began
    pub started_at: i64,
    /// Unix timestamp (milliseconds) when the source completed
    pub finished_at: i64,
}

impl WriteSummary {
    /// Offset one past the last byte written
    pub fn end_offset(&self) -> u64 {
        self.start_offset + self.bytes_written
    }
}
