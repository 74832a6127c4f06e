//! Test doubles for the host seams.

use afc_traits::{EventLog, PersistedRegion};

/// A region whose reads and/or writes always fail.
#[derive(Debug, Clone, Copy)]
pub struct FailingRegion {
    pub capacity: usize,
    pub fail_read: bool,
    pub fail_write: bool,
}

impl FailingRegion {
    /// Fails both reads and writes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            fail_read: true,
            fail_write: true,
        }
    }
}

impl PersistedRegion for FailingRegion {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        if self.fail_read {
            return Err(Box::new(std::io::Error::other("region read failed")));
        }
        buf.fill(0xFF);
        Ok(buf.len())
    }

    fn write(&mut self, _bytes: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.fail_write {
            return Err(Box::new(std::io::Error::other("region write failed")));
        }
        Ok(())
    }
}

/// Event log that keeps every record.
#[derive(Debug, Clone, Default)]
pub struct RecordingLog {
    pub records: Vec<Vec<u8>>,
}

impl RecordingLog {
    /// Records of exactly `len` bytes, in order.
    pub fn of_len(&self, len: usize) -> Vec<&[u8]> {
        self.records
            .iter()
            .filter(|r| r.len() == len)
            .map(Vec::as_slice)
            .collect()
    }
}

impl EventLog for RecordingLog {
    fn append(&mut self, record: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.records.push(record.to_vec());
        Ok(())
    }
}
