//! Anonymous mapped region.

use crate::error::{StorageError, StorageResult};
use crate::mapping::Mapping;
use crate::region::MappedRegion;
use memmap2::MmapMut;
use std::io;
use std::path::Path;

/// A region of anonymous shared memory.
///
/// Used for in-memory datafiles. Contents are lost when the region is
/// dropped and the region cannot be renamed.
#[derive(Debug)]
pub struct AnonymousRegion {
    mapping: Mapping,
}

impl AnonymousRegion {
    /// Maps `size` bytes of zeroed anonymous memory.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` or `MapFailed` if the kernel refuses the mapping.
    pub fn new(size: usize) -> StorageResult<Self> {
        if size == 0 {
            return Ok(Self {
                mapping: Mapping::unmapped(),
            });
        }
        let map = MmapMut::map_anon(size).map_err(StorageError::from_map)?;
        Ok(Self {
            mapping: Mapping::writable(map),
        })
    }
}

impl MappedRegion for AnonymousRegion {
    fn len(&self) -> usize {
        self.mapping.len()
    }

    fn read(&self, offset: usize, len: usize) -> StorageResult<&[u8]> {
        self.mapping.read(offset, len)
    }

    fn write(&self, offset: usize, data: &[u8]) -> StorageResult<()> {
        self.mapping.write(offset, data)
    }

    fn fill(&self, offset: usize, len: usize, byte: u8) -> StorageResult<()> {
        self.mapping.fill(offset, len, byte)
    }

    fn flush_range(&self, offset: usize, len: usize) -> StorageResult<()> {
        // Nothing to persist, only validate the range.
        self.mapping.read(offset, len).map(|_| ())
    }

    fn sync(&self) -> StorageResult<()> {
        Ok(())
    }

    fn is_writable(&self) -> bool {
        self.mapping.is_writable()
    }

    fn path(&self) -> Option<&Path> {
        None
    }

    fn truncate_and_protect(&mut self, len: usize) -> StorageResult<()> {
        self.mapping.protect()?;
        self.mapping.shrink(len);
        Ok(())
    }

    fn protect(&mut self) -> StorageResult<()> {
        self.mapping.protect()
    }

    fn rename(&mut self, _new_path: &Path) -> StorageResult<()> {
        Err(StorageError::Io(io::Error::new(
            io::ErrorKind::Unsupported,
            "anonymous regions have no file name",
        )))
    }

    fn close(&mut self) {
        self.mapping.unmap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_starts_zeroed() {
        let region = AnonymousRegion::new(4096).unwrap();
        assert_eq!(region.len(), 4096);
        assert!(region.read(0, 4096).unwrap().iter().all(|&b| b == 0));
        assert!(region.path().is_none());
    }

    #[test]
    fn anonymous_write_read() {
        let region = AnonymousRegion::new(4096).unwrap();
        region.write(8, b"in memory").unwrap();
        region.flush_range(8, 9).unwrap();
        assert_eq!(region.read(8, 9).unwrap(), b"in memory");
    }

    #[test]
    fn anonymous_truncate_and_protect() {
        let mut region = AnonymousRegion::new(4096).unwrap();
        region.write(0, b"frozen").unwrap();
        region.truncate_and_protect(32).unwrap();

        assert_eq!(region.len(), 32);
        assert!(!region.is_writable());
        assert_eq!(region.read(0, 6).unwrap(), b"frozen");
        assert!(region.read(30, 4).is_err());
    }

    #[test]
    fn anonymous_cannot_rename() {
        let mut region = AnonymousRegion::new(4096).unwrap();
        assert!(region.rename(Path::new("logfile-1.db")).is_err());
    }

    #[test]
    fn anonymous_concurrent_disjoint_writes() {
        use std::sync::Arc;
        use std::thread;

        let region = Arc::new(AnonymousRegion::new(64 * 1024).unwrap());
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let region = Arc::clone(&region);
                thread::spawn(move || {
                    let offset = usize::from(i) * 1024;
                    region.fill(offset, 1024, i + 1).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for i in 0..8u8 {
            let chunk = region.read(usize::from(i) * 1024, 1024).unwrap();
            assert!(chunk.iter().all(|&b| b == i + 1));
        }
    }
}
