//! Core type definitions for voclog.

use std::fmt;

/// A tick: the process-wide, monotonically assigned identifier of a marker.
///
/// Only the low 56 bits are persisted; see [`MAX_TICK`].
pub type Tick = u64;

/// Largest tick that fits into a marker header.
pub const MAX_TICK: Tick = (1 << 56) - 1;

/// Identifier of a datafile (and of the logfile that owns it).
///
/// File IDs are taken from the tick source, so they are unique and grow
/// with creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FileId(pub u64);

impl FileId {
    /// Creates a new file ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a database.
///
/// `DatabaseId(0)` means "no database context".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DatabaseId(pub u64);

impl DatabaseId {
    /// Creates a new database ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "db:{}", self.0)
    }
}

/// Identifier of a collection within a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CollectionId(pub u64);

impl CollectionId {
    /// Creates a new collection ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cid:{}", self.0)
    }
}

/// Identifier of a transaction, as recorded in document and transaction
/// markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_display() {
        assert_eq!(FileId::new(42).to_string(), "42");
        assert_eq!(DatabaseId::new(1).to_string(), "db:1");
        assert_eq!(CollectionId::new(7).to_string(), "cid:7");
        assert_eq!(TransactionId::new(9).to_string(), "tid:9");
    }

    #[test]
    fn id_ordering() {
        assert!(FileId::new(1) < FileId::new(2));
        assert_eq!(DatabaseId::default().as_u64(), 0);
    }

    #[test]
    fn max_tick_is_56_bits() {
        assert_eq!(MAX_TICK, 0x00FF_FFFF_FFFF_FFFF);
    }
}
