//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while creating, mapping or accessing a region.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to access bytes outside the mapped region.
    #[error("access beyond end of region: offset {offset}, len {len}, size {size}")]
    OutOfBounds {
        /// The requested offset.
        offset: usize,
        /// The requested length.
        len: usize,
        /// The size of the mapped region.
        size: usize,
    },

    /// The region is mapped read-only.
    #[error("region is read-only")]
    ReadOnly,

    /// The region has been unmapped.
    #[error("region is not mapped")]
    Unmapped,

    /// The file system ran out of space.
    #[error("file system full: {0}")]
    FilesystemFull(io::Error),

    /// The kernel ran out of memory for the mapping.
    #[error("out of memory while mapping: {0}")]
    OutOfMemory(io::Error),

    /// The kernel refused to create the memory mapping.
    #[error("cannot create memory mapping: {0}")]
    MapFailed(io::Error),
}

impl StorageError {
    /// Classifies an I/O error raised while writing or growing a file.
    pub(crate) fn from_write(err: io::Error) -> Self {
        if is_no_space(&err) {
            Self::FilesystemFull(err)
        } else {
            Self::Io(err)
        }
    }

    /// Classifies an I/O error raised while creating a mapping.
    pub(crate) fn from_map(err: io::Error) -> Self {
        if is_no_space(&err) {
            Self::FilesystemFull(err)
        } else if is_no_memory(&err) {
            Self::OutOfMemory(err)
        } else {
            Self::MapFailed(err)
        }
    }
}

#[cfg(unix)]
fn is_no_space(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::ENOSPC) | Some(libc::EDQUOT))
}

#[cfg(not(unix))]
fn is_no_space(_err: &io::Error) -> bool {
    false
}

#[cfg(unix)]
fn is_no_memory(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENOMEM)
}

#[cfg(not(unix))]
fn is_no_memory(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::OutOfMemory
}
