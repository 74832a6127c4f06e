//! File-backed persisted region.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use afc_traits::PersistedRegion;

/// Replace `path` with `bytes` via a sibling temp file and rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("new");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)
}

/// A persisted region stored as a file image.
///
/// A missing file reads as zero bytes, which the controller treats as first run.
#[derive(Debug, Clone)]
pub struct FileRegion {
    path: PathBuf,
    capacity: usize,
}

impl FileRegion {
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whole image, or an empty vector if the file does not exist yet.
    pub fn load_image(&self) -> io::Result<Vec<u8>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

impl PersistedRegion for FileRegion {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        let image = self.load_image()?;
        let n = buf.len().min(image.len()).min(self.capacity);
        buf[..n].copy_from_slice(&image[..n]);
        Ok(n)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if bytes.len() > self.capacity {
            return Err(format!(
                "write of {} bytes exceeds region capacity {}",
                bytes.len(),
                self.capacity
            )
            .into());
        }
        write_atomic(&self.path, bytes)?;
        tracing::debug!(path = %self.path.display(), bytes = bytes.len(), "NVM image written");
        Ok(())
    }
}
