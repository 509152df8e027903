//! Raw, bounds-checked view over a memory mapping.
//!
//! This is the only place in voclog that touches mapped memory through raw
//! pointers. Every access goes through [`Mapping::check`] first.
//!
//! # Concurrency contract
//!
//! `write` takes `&self` so that many writers can copy into *disjoint* byte
//! ranges of the same mapping at once. Callers must guarantee that no two
//! threads write overlapping ranges concurrently and that a range is not read
//! while it is being written. The WAL slot allocator upholds this by handing
//! out each range to exactly one writer and publishing it to readers only
//! through its mutex.

#![allow(unsafe_code)]

use crate::error::{StorageError, StorageResult};
use memmap2::{Mmap, MmapMut};
use std::fmt;
use std::ptr;

/// Owner of the underlying mapping; dropping it unmaps the memory.
pub(crate) enum Owner {
    Writable(MmapMut),
    ReadOnly(Mmap),
    Unmapped,
}

pub(crate) struct Mapping {
    owner: Owner,
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the pointer is derived from the owned mapping and stays valid until
// the owner is dropped or replaced, which requires `&mut self`. Shared access
// only reads or writes through bounds-checked ranges, and the disjointness of
// concurrent writes is part of the documented contract above.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    pub(crate) fn writable(mut map: MmapMut) -> Self {
        let ptr = map.as_mut_ptr();
        let len = map.len();
        Self {
            owner: Owner::Writable(map),
            ptr,
            len,
        }
    }

    pub(crate) fn read_only(map: Mmap) -> Self {
        let ptr = map.as_ptr().cast_mut();
        let len = map.len();
        Self {
            owner: Owner::ReadOnly(map),
            ptr,
            len,
        }
    }

    pub(crate) fn unmapped() -> Self {
        Self {
            owner: Owner::Unmapped,
            ptr: ptr::null_mut(),
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_writable(&self) -> bool {
        matches!(self.owner, Owner::Writable(_))
    }

    pub(crate) fn is_mapped(&self) -> bool {
        !matches!(self.owner, Owner::Unmapped)
    }

    fn check(&self, offset: usize, len: usize) -> StorageResult<()> {
        if !self.is_mapped() {
            return Err(StorageError::Unmapped);
        }
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(StorageError::OutOfBounds {
                offset,
                len,
                size: self.len,
            }),
        }
    }

    pub(crate) fn read(&self, offset: usize, len: usize) -> StorageResult<&[u8]> {
        self.check(offset, len)?;
        if len == 0 {
            return Ok(&[]);
        }
        // SAFETY: `check` proved `offset + len <= self.len`, and the mapping
        // outlives the returned borrow of `self`.
        Ok(unsafe { std::slice::from_raw_parts(self.ptr.add(offset), len) })
    }

    pub(crate) fn write(&self, offset: usize, data: &[u8]) -> StorageResult<()> {
        self.check(offset, data.len())?;
        if !self.is_writable() {
            return Err(StorageError::ReadOnly);
        }
        if data.is_empty() {
            return Ok(());
        }
        // SAFETY: bounds checked above; the source is a distinct Rust slice
        // so the ranges cannot overlap.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(offset), data.len());
        }
        Ok(())
    }

    pub(crate) fn fill(&self, offset: usize, len: usize, byte: u8) -> StorageResult<()> {
        self.check(offset, len)?;
        if !self.is_writable() {
            return Err(StorageError::ReadOnly);
        }
        if len == 0 {
            return Ok(());
        }
        // SAFETY: bounds checked above.
        unsafe {
            ptr::write_bytes(self.ptr.add(offset), byte, len);
        }
        Ok(())
    }

    pub(crate) fn flush_range(&self, offset: usize, len: usize) -> StorageResult<()> {
        self.check(offset, len)?;
        match &self.owner {
            Owner::Writable(map) if len > 0 => map.flush_range(offset, len).map_err(StorageError::from_write),
            _ => Ok(()),
        }
    }

    pub(crate) fn flush(&self) -> StorageResult<()> {
        match &self.owner {
            Owner::Writable(map) => map.flush().map_err(StorageError::from_write),
            Owner::ReadOnly(_) => Ok(()),
            Owner::Unmapped => Err(StorageError::Unmapped),
        }
    }

    /// Switches the mapping to read-only in place (`mprotect`).
    pub(crate) fn protect(&mut self) -> StorageResult<()> {
        match std::mem::replace(&mut self.owner, Owner::Unmapped) {
            Owner::Writable(map) => {
                let len = self.len;
                let map = map.make_read_only().map_err(StorageError::from_map)?;
                *self = Self::read_only(map);
                self.len = len;
                Ok(())
            }
            other => {
                self.owner = other;
                Ok(())
            }
        }
    }

    /// Shrinks the logical length without touching the mapping.
    pub(crate) fn shrink(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    /// Releases the mapping. Later accesses fail with [`StorageError::Unmapped`].
    pub(crate) fn unmap(&mut self) {
        *self = Self::unmapped();
    }
}

impl fmt::Debug for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.owner {
            Owner::Writable(_) => "writable",
            Owner::ReadOnly(_) => "read-only",
            Owner::Unmapped => "unmapped",
        };
        f.debug_struct("Mapping")
            .field("kind", &kind)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anon(len: usize) -> Mapping {
        Mapping::writable(MmapMut::map_anon(len).unwrap())
    }

    #[test]
    fn write_then_read() {
        let map = anon(4096);
        map.write(100, b"marker").unwrap();
        assert_eq!(map.read(100, 6).unwrap(), b"marker");
    }

    #[test]
    fn bounds_are_enforced() {
        let map = anon(4096);
        assert!(matches!(
            map.read(4090, 8),
            Err(StorageError::OutOfBounds { .. })
        ));
        assert!(matches!(
            map.write(usize::MAX, b"x"),
            Err(StorageError::OutOfBounds { .. })
        ));
        assert!(map.read(4096, 0).unwrap().is_empty());
    }

    #[test]
    fn protect_rejects_writes() {
        let mut map = anon(4096);
        map.write(0, b"abc").unwrap();
        map.protect().unwrap();
        assert!(!map.is_writable());
        assert!(matches!(map.write(0, b"x"), Err(StorageError::ReadOnly)));
        assert_eq!(map.read(0, 3).unwrap(), b"abc");
    }

    #[test]
    fn shrink_limits_reads() {
        let mut map = anon(4096);
        map.shrink(64);
        assert_eq!(map.len(), 64);
        assert!(map.read(60, 8).is_err());
    }

    #[test]
    fn unmapped_rejects_everything() {
        let mut map = anon(4096);
        map.unmap();
        assert!(matches!(map.read(0, 1), Err(StorageError::Unmapped)));
        assert!(matches!(map.flush(), Err(StorageError::Unmapped)));
    }
}
