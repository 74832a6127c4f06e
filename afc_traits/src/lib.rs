pub mod region;

pub use region::MemRegion;

/// Host-owned persisted byte region (NVM page, flash sector, file image).
///
/// The controller treats the contents as opaque; layout is private to the
/// NVM codec in `afc_core`.
pub trait PersistedRegion {
    /// Fixed capacity of the region in bytes.
    fn capacity(&self) -> usize;

    /// Fill `buf` from the start of the region; returns the number of bytes read.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Box<dyn std::error::Error + Send + Sync>>;

    /// Overwrite the start of the region with `bytes`.
    fn write(&mut self, bytes: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Append-only sink for fixed-size diagnostic records.
pub trait EventLog {
    fn append(&mut self, record: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

impl<T: PersistedRegion + ?Sized> PersistedRegion for Box<T> {
    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        (**self).read(buf)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).write(bytes)
    }
}

impl<T: EventLog + ?Sized> EventLog for Box<T> {
    fn append(&mut self, record: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).append(record)
    }
}
