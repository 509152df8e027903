//! File-backed mapped region.

use crate::error::{StorageError, StorageResult};
use crate::mapping::Mapping;
use crate::region::MappedRegion;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Size of the zero buffer used when pre-allocating a new file.
const ZERO_CHUNK: usize = 64 * 1024;

/// A shared memory mapping of a file on disk.
///
/// New files are fully zero-filled before they are mapped, so later writes
/// into the mapping never hit a sparse-file `ENOSPC` surprise.
///
/// # Example
///
/// ```no_run
/// use voclog_storage::{FileRegion, MappedRegion};
/// use std::path::Path;
///
/// let region = FileRegion::create(Path::new("temp-1.db"), 4096).unwrap();
/// region.write(0, b"hello").unwrap();
/// region.flush_range(0, 5).unwrap();
/// ```
#[derive(Debug)]
pub struct FileRegion {
    path: PathBuf,
    file: File,
    mapping: Mapping,
}

impl FileRegion {
    /// Creates a new file of exactly `size` bytes, zero-filled, mapped R/W.
    ///
    /// The file must not exist yet. On failure the partial file is removed.
    ///
    /// # Errors
    ///
    /// Returns `FilesystemFull` if the disk runs out of space while filling,
    /// `OutOfMemory` or `MapFailed` if the mapping cannot be created, and
    /// `Io` otherwise.
    pub fn create(path: &Path, size: usize) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        match Self::fill_and_map(path, file, size) {
            Ok(region) => Ok(region),
            Err(err) => {
                let _ = fs::remove_file(path);
                Err(err)
            }
        }
    }

    fn fill_and_map(path: &Path, mut file: File, size: usize) -> StorageResult<Self> {
        let zeros = vec![0u8; ZERO_CHUNK.min(size.max(1))];
        let mut remaining = size;
        while remaining > 0 {
            let n = remaining.min(zeros.len());
            file.write_all(&zeros[..n])
                .map_err(StorageError::from_write)?;
            remaining -= n;
        }
        file.sync_all().map_err(StorageError::from_write)?;

        let mapping = map_writable(&file, size)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            mapping,
        })
    }

    /// Maps an existing file read-write.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or mapped.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let size = file_size(&file)?;
        let mapping = map_writable(&file, size)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            mapping,
        })
    }

    /// Maps an existing file read-only.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or mapped.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        let size = file_size(&file)?;
        let mapping = map_read_only(&file, size)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            mapping,
        })
    }

    /// Returns the current on-disk size of the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be read.
    pub fn file_len(&self) -> StorageResult<u64> {
        Ok(self.file.metadata()?.len())
    }
}

impl MappedRegion for FileRegion {
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
        self.mapping.flush_range(offset, len)
    }

    fn sync(&self) -> StorageResult<()> {
        self.mapping.flush()?;
        self.file.sync_all().map_err(StorageError::from_write)
    }

    fn is_writable(&self) -> bool {
        self.mapping.is_writable()
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn truncate_and_protect(&mut self, len: usize) -> StorageResult<()> {
        if self.mapping.is_writable() {
            self.mapping.flush()?;
        }
        self.mapping.unmap();

        self.file
            .set_len(len as u64)
            .map_err(StorageError::from_write)?;
        self.file.sync_all().map_err(StorageError::from_write)?;

        self.mapping = map_read_only(&self.file, len)?;
        Ok(())
    }

    fn protect(&mut self) -> StorageResult<()> {
        self.mapping.protect()
    }

    fn rename(&mut self, new_path: &Path) -> StorageResult<()> {
        fs::rename(&self.path, new_path)?;
        self.path = new_path.to_path_buf();
        Ok(())
    }

    fn close(&mut self) {
        self.mapping.unmap();
    }
}

fn file_size(file: &File) -> StorageResult<usize> {
    let len = file.metadata()?.len();
    usize::try_from(len).map_err(|_| {
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "file too large to map",
        ))
    })
}

#[allow(unsafe_code)]
fn map_writable(file: &File, len: usize) -> StorageResult<Mapping> {
    if len == 0 {
        return Ok(Mapping::unmapped());
    }
    // SAFETY: the file is owned by the region for the lifetime of the mapping.
    // Concurrent modification by other processes is excluded by the WAL
    // directory lock.
    let map = unsafe { memmap2::MmapOptions::new().len(len).map_mut(file) }
        .map_err(StorageError::from_map)?;
    Ok(Mapping::writable(map))
}

#[allow(unsafe_code)]
fn map_read_only(file: &File, len: usize) -> StorageResult<Mapping> {
    if len == 0 {
        return Ok(Mapping::unmapped());
    }
    // SAFETY: see `map_writable`.
    let map = unsafe { memmap2::MmapOptions::new().len(len).map(file) }
        .map_err(StorageError::from_map)?;
    Ok(Mapping::read_only(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_is_zero_filled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("temp-1.db");
        let region = FileRegion::create(&path, 8192).unwrap();

        assert_eq!(region.len(), 8192);
        assert_eq!(region.file_len().unwrap(), 8192);
        assert!(region.read(0, 8192).unwrap().iter().all(|&b| b == 0));
        assert!(region.is_writable());
        assert_eq!(region.path(), Some(path.as_path()));
    }

    #[test]
    fn file_create_refuses_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("temp-1.db");
        fs::write(&path, b"occupied").unwrap();

        assert!(matches!(
            FileRegion::create(&path, 4096),
            Err(StorageError::Io(_))
        ));
        assert_eq!(fs::read(&path).unwrap(), b"occupied");
    }

    #[test]
    fn file_write_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logfile-1.db");
        {
            let region = FileRegion::create(&path, 4096).unwrap();
            region.write(128, b"durable").unwrap();
            region.sync().unwrap();
        }

        let region = FileRegion::open(&path).unwrap();
        assert_eq!(region.read(128, 7).unwrap(), b"durable");
    }

    #[test]
    fn file_truncate_and_protect() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logfile-2.db");
        let mut region = FileRegion::create(&path, 8192).unwrap();
        region.write(0, b"sealed").unwrap();

        region.truncate_and_protect(64).unwrap();

        assert_eq!(region.len(), 64);
        assert_eq!(region.file_len().unwrap(), 64);
        assert!(!region.is_writable());
        assert_eq!(region.read(0, 6).unwrap(), b"sealed");
        assert!(matches!(
            region.write(0, b"x"),
            Err(StorageError::ReadOnly)
        ));
    }

    #[test]
    fn file_open_read_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logfile-3.db");
        drop(FileRegion::create(&path, 4096).unwrap());

        let region = FileRegion::open_read_only(&path).unwrap();
        assert!(!region.is_writable());
        assert!(region.write(0, b"x").is_err());
    }

    #[test]
    fn file_rename() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("temp-4.db");
        let to = dir.path().join("logfile-4.db");
        let mut region = FileRegion::create(&from, 4096).unwrap();
        region.write(0, b"abc").unwrap();

        region.rename(&to).unwrap();

        assert!(!from.exists());
        assert!(to.exists());
        assert_eq!(region.path(), Some(to.as_path()));
        assert_eq!(region.read(0, 3).unwrap(), b"abc");
    }

    #[test]
    fn file_close_unmaps() {
        let dir = tempdir().unwrap();
        let mut region = FileRegion::create(&dir.path().join("temp-5.db"), 4096).unwrap();
        region.close();
        assert!(matches!(region.read(0, 1), Err(StorageError::Unmapped)));
    }

    #[test]
    fn file_fill_and_flush_range() {
        let dir = tempdir().unwrap();
        let region = FileRegion::create(&dir.path().join("temp-6.db"), 4096).unwrap();
        region.fill(10, 20, 0xAB).unwrap();
        region.flush_range(10, 20).unwrap();
        assert!(region.read(10, 20).unwrap().iter().all(|&b| b == 0xAB));
        assert_eq!(region.read(30, 1).unwrap(), &[0]);
    }
}
