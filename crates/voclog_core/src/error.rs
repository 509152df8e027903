//! Error types for voclog core.

use std::io;
use thiserror::Error;
use voclog_storage::StorageError;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in voclog core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Mapped region error not covered by a more specific variant.
    #[error("storage error: {0}")]
    Storage(#[source] StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempt to modify a read-only datafile.
    #[error("datafile is read-only")]
    ReadOnly,

    /// Operation not permitted in the datafile's current state.
    #[error("illegal state: {message}")]
    IllegalState {
        /// Description of the state violation.
        message: String,
    },

    /// The datafile has already been sealed.
    #[error("datafile already sealed")]
    AlreadySealed,

    /// The datafile has no room left for the reservation.
    #[error("datafile full")]
    DatafileFull,

    /// The marker cannot fit even into a fresh journal.
    #[error("document too large: {size} bytes exceeds limit of {limit} bytes")]
    DocumentTooLarge {
        /// Requested (aligned) size.
        size: usize,
        /// Largest size that could be accepted.
        limit: usize,
    },

    /// The requested datafile size cannot hold header and footer.
    #[error("maximal size {size} too small, need at least {minimum} bytes")]
    MaximalSizeTooSmall {
        /// Requested size.
        size: usize,
        /// Minimum size.
        minimum: usize,
    },

    /// A datafile is structurally damaged.
    #[error("corrupted datafile: {message}")]
    CorruptedDatafile {
        /// Description of the corruption.
        message: String,
    },

    /// A marker failed its CRC check.
    #[error(
        "crc mismatch at position {position} (marker type {marker_type}): expected {expected:08x}, actual {actual:08x}"
    )]
    CrcMismatch {
        /// Offset of the marker in the datafile.
        position: usize,
        /// Raw type byte of the marker.
        marker_type: u8,
        /// CRC stored in the marker.
        expected: u32,
        /// CRC computed over the marker bytes.
        actual: u32,
    },

    /// The file contains only zero bytes.
    #[error("datafile is empty")]
    DatafileEmpty,

    /// The file is too short to contain a header marker.
    #[error("datafile unreadable: {message}")]
    DatafileUnreadable {
        /// Description of the problem.
        message: String,
    },

    /// No logfile could be obtained for writing.
    #[error("no journal available")]
    NoJournal,

    /// Waiting for a tick to become durable timed out.
    #[error("timed out waiting for sync of tick {tick}")]
    SyncTimeout {
        /// The tick that was waited for.
        tick: u64,
    },

    /// The request was canceled because the WAL is shutting down.
    #[error("request canceled")]
    RequestCanceled,

    /// The kernel refused a memory mapping.
    #[error("out of memory while mapping: {0}")]
    OutOfMemoryMmap(#[source] io::Error),

    /// The file system ran out of space.
    #[error("file system full: {0}")]
    FilesystemFull(#[source] io::Error),

    /// An operating system call failed.
    #[error("system error: {message}")]
    SysError {
        /// Description of the failure.
        message: String,
    },

    /// Configuration rejected by validation.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// Another process holds the WAL directory lock.
    #[error("logfile directory locked: another process has exclusive access")]
    LogfileLocked,

    /// The SHUTDOWN state file could not be encoded or decoded.
    #[error("state file error: {0}")]
    StateFile(#[from] serde_json::Error),
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::FilesystemFull(e) => Self::FilesystemFull(e),
            StorageError::OutOfMemory(e) => Self::OutOfMemoryMmap(e),
            StorageError::MapFailed(e) => Self::sys_error(format!("cannot create memory mapping: {e}")),
            StorageError::ReadOnly => Self::ReadOnly,
            other => Self::Storage(other),
        }
    }
}

impl CoreError {
    /// Creates an illegal state error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Creates a corrupted datafile error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::CorruptedDatafile {
            message: message.into(),
        }
    }

    /// Creates an unreadable datafile error.
    pub fn unreadable(message: impl Into<String>) -> Self {
        Self::DatafileUnreadable {
            message: message.into(),
        }
    }

    /// Creates a system error.
    pub fn sys_error(message: impl Into<String>) -> Self {
        Self::SysError {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a document too large error.
    pub fn too_large(size: usize, limit: usize) -> Self {
        Self::DocumentTooLarge { size, limit }
    }

    /// Classifies an error raised while syncing or writing a datafile.
    ///
    /// Disk-full conditions stay `FilesystemFull`; anything else becomes a
    /// `SysError`.
    pub(crate) fn from_sync(err: StorageError) -> Self {
        match err {
            StorageError::FilesystemFull(e) => Self::FilesystemFull(e),
            other => Self::sys_error(other.to_string()),
        }
    }

    /// Returns `true` for errors that indicate damaged on-disk data.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::CorruptedDatafile { .. } | Self::CrcMismatch { .. } | Self::DatafileUnreadable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_mismatch_display() {
        let err = CoreError::CrcMismatch {
            position: 64,
            marker_type: 30,
            expected: 0xdead_beef,
            actual: 0x0000_0001,
        };
        assert_eq!(
            err.to_string(),
            "crc mismatch at position 64 (marker type 30): expected deadbeef, actual 00000001"
        );
        assert!(err.is_corruption());
    }

    #[test]
    fn storage_errors_are_classified() {
        let err: CoreError = StorageError::ReadOnly.into();
        assert!(matches!(err, CoreError::ReadOnly));

        let err: CoreError = StorageError::OutOfMemory(io::Error::other("no memory")).into();
        assert!(matches!(err, CoreError::OutOfMemoryMmap(_)));

        let err: CoreError = StorageError::MapFailed(io::Error::other("denied")).into();
        assert!(matches!(err, CoreError::SysError { .. }));

        let err: CoreError = StorageError::Unmapped.into();
        assert!(matches!(err, CoreError::Storage(StorageError::Unmapped)));

        let err = CoreError::from_sync(StorageError::Io(io::Error::other("eio")));
        assert!(matches!(err, CoreError::SysError { .. }));
    }
}
