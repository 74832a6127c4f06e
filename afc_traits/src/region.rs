use crate::PersistedRegion;

/// Memory-backed persisted region.
///
/// - capacity(): fixed at construction
/// - read(): copies up to `buf.len()` bytes from the start
/// - write(): fails when `bytes` exceeds the capacity
///
/// A fresh region is filled with `0xFF`, like erased flash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemRegion {
    bytes: Vec<u8>,
}

impl MemRegion {
    pub const ERASED: u8 = 0xFF;

    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![Self::ERASED; capacity],
        }
    }

    /// Wrap an existing image (e.g. loaded from a file).
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Mutable view of the raw image; lets hosts and tests simulate corruption.
    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl PersistedRegion for MemRegion {
    #[inline]
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        let n = buf.len().min(self.bytes.len());
        buf[..n].copy_from_slice(&self.bytes[..n]);
        Ok(n)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if bytes.len() > self.bytes.len() {
            return Err(format!(
                "write of {} bytes exceeds region capacity {}",
                bytes.len(),
                self.bytes.len()
            )
            .into());
        }
        self.bytes[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}
