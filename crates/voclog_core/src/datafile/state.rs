//! Datafile lifecycle state.

use std::fmt;

/// Lifecycle state of a datafile.
///
/// ```text
/// Write ──seal──► Read
///   │               │
///   └────close──────┴──► Closed
/// ```
///
/// Any I/O failure while writing, syncing or sealing moves the datafile to
/// `WriteError`, which is sticky until the file is reopened. A file that
/// fails validation on open is in `OpenError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatafileState {
    /// Sealed or opened read-only.
    Read,
    /// Accepting reservations.
    Write,
    /// Validation failed while opening.
    OpenError,
    /// An I/O operation failed.
    WriteError,
    /// Renaming the file failed.
    RenameError,
    /// Unmapped and closed.
    Closed,
}

impl DatafileState {
    /// Returns `true` if the state is one of the error states.
    #[must_use]
    pub const fn is_error(self) -> bool {
        matches!(self, Self::OpenError | Self::WriteError | Self::RenameError)
    }
}

impl fmt::Display for DatafileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::OpenError => "open-error",
            Self::WriteError => "write-error",
            Self::RenameError => "rename-error",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}
