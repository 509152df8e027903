//! Mapped region trait definition.

use crate::error::StorageResult;
use std::fmt;
use std::path::Path;

/// A fixed-size, memory-mapped byte region.
///
/// Regions are **opaque byte stores**. They know nothing about markers,
/// datafiles or logfiles; `voclog_core` owns all format interpretation.
///
/// # Invariants
///
/// - Every access is bounds-checked against [`len`](Self::len)
/// - `write` takes `&self`; concurrent writers must use disjoint ranges
/// - After [`truncate_and_protect`](Self::truncate_and_protect) the region is
///   read-only and exactly `len` bytes long
///
/// # Implementors
///
/// - [`super::FileRegion`] - a shared mapping of a file on disk
/// - [`super::AnonymousRegion`] - anonymous memory, for tests and scratch space
pub trait MappedRegion: Send + Sync + fmt::Debug {
    /// Returns the number of addressable bytes.
    fn len(&self) -> usize;

    /// Returns `true` if the region has no addressable bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrows `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OutOfBounds`](crate::StorageError::OutOfBounds)
    /// if the range does not fit, or `Unmapped` after the region was closed.
    fn read(&self, offset: usize, len: usize) -> StorageResult<&[u8]>;

    /// Copies `data` into the region at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `ReadOnly` for protected regions and `OutOfBounds` if the
    /// range does not fit.
    fn write(&self, offset: usize, data: &[u8]) -> StorageResult<()>;

    /// Sets `len` bytes starting at `offset` to `byte`.
    ///
    /// # Errors
    ///
    /// Same as [`write`](Self::write).
    fn fill(&self, offset: usize, len: usize, byte: u8) -> StorageResult<()>;

    /// Flushes a byte range to durable storage (`msync`).
    ///
    /// # Errors
    ///
    /// Returns `FilesystemFull` or `Io` if the kernel reports a failure.
    fn flush_range(&self, offset: usize, len: usize) -> StorageResult<()>;

    /// Flushes the whole region to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn sync(&self) -> StorageResult<()>;

    /// Returns `true` if the region accepts writes.
    fn is_writable(&self) -> bool;

    /// Returns the backing file path, or `None` for anonymous memory.
    fn path(&self) -> Option<&Path>;

    /// Flushes, shrinks the region to `len` bytes and remaps it read-only.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing, truncating or remapping fails. The
    /// region may be left unmapped in that case.
    fn truncate_and_protect(&mut self, len: usize) -> StorageResult<()>;

    /// Remaps the region read-only without changing its length.
    ///
    /// # Errors
    ///
    /// Returns an error if the protection change fails.
    fn protect(&mut self) -> StorageResult<()>;

    /// Renames the backing file.
    ///
    /// # Errors
    ///
    /// Anonymous regions cannot be renamed and always fail.
    fn rename(&mut self, new_path: &Path) -> StorageResult<()>;

    /// Releases the mapping. Subsequent accesses fail with `Unmapped`.
    fn close(&mut self);
}
