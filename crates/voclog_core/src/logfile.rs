//! WAL logfiles.
//!
//! A logfile wraps one [`Datafile`] and tracks where it is in its
//! lifecycle:
//!
//! ```text
//! Empty -> Open -> SealRequested -> Sealed -> CollectionRequested -> Collected
//! ```
//!
//! Status changes only ever move to the right. The datafile sits behind a
//! read-write lock: reservations, writers copying into their reserved
//! ranges, readers and the synchronizer share it. Only sealing, renaming and
//! closing take it exclusively.

use crate::datafile::{self, Datafile, DatafileState};
use crate::error::{CoreError, CoreResult};
use crate::marker::{aligned_size, MarkerBuf, MarkerHeader, FOOTER_MARKER_SIZE, JOURNAL_OVERHEAD};
use crate::types::{FileId, Tick};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use tracing::{debug, info};

/// Lifecycle status of a logfile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogfileStatus {
    /// Status could not be determined.
    Unknown = 0,
    /// Created, no header written yet.
    Empty = 1,
    /// Accepting writes.
    Open = 2,
    /// Footer handed out; the synchronizer will seal it.
    SealRequested = 3,
    /// Footer written, file truncated and read-only.
    Sealed = 4,
    /// Handed to the collector.
    CollectionRequested = 5,
    /// Contents transferred elsewhere; may be removed.
    Collected = 6,
}

impl LogfileStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Empty,
            2 => Self::Open,
            3 => Self::SealRequested,
            4 => Self::Sealed,
            5 => Self::CollectionRequested,
            6 => Self::Collected,
            _ => Self::Unknown,
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Empty => "empty",
            Self::Open => "open",
            Self::SealRequested => "seal-requested",
            Self::Sealed => "sealed",
            Self::CollectionRequested => "collection-requested",
            Self::Collected => "collected",
        }
    }
}

impl fmt::Display for LogfileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A WAL logfile.
pub struct Logfile {
    id: FileId,
    status: AtomicU8,
    users: AtomicU64,
    collect_queue_size: AtomicU64,
    datafile: RwLock<Datafile>,
}

impl Logfile {
    fn new(id: FileId, datafile: Datafile, status: LogfileStatus) -> Self {
        Self {
            id,
            status: AtomicU8::new(status as u8),
            users: AtomicU64::new(0),
            collect_queue_size: AtomicU64::new(0),
            datafile: RwLock::new(datafile),
        }
    }

    /// Creates a new, empty logfile of `size` bytes at `path`.
    ///
    /// No header is written; the slot allocator writes it when it first
    /// takes the logfile into use.
    ///
    /// # Errors
    ///
    /// Returns an error if the datafile cannot be created.
    pub fn create_new(path: &Path, id: FileId, size: usize) -> CoreResult<Self> {
        let datafile = Datafile::create(Some(path), id, size, false)?;
        debug!(id = %id, size = datafile.maximal_size(), "created logfile");
        Ok(Self::new(id, datafile, LogfileStatus::Empty))
    }

    /// Opens an existing logfile and runs the recovery scanner on it.
    ///
    /// Sealed logfiles come back as `Sealed`, or `Collected` if
    /// `was_collected` is set; unsealed ones come back as `Open`.
    ///
    /// # Errors
    ///
    /// Returns the scanner's error if the file is corrupted and
    /// `ignore_errors` is false.
    pub fn open_existing(
        path: &Path,
        id: FileId,
        was_collected: bool,
        ignore_errors: bool,
    ) -> CoreResult<Self> {
        let datafile = Datafile::open(path, ignore_errors)?;
        if datafile.fid() != id {
            return Err(CoreError::corrupted(format!(
                "{} carries file id {}, expected {id}",
                path.display(),
                datafile.fid()
            )));
        }

        let status = if !datafile.is_sealed() {
            LogfileStatus::Open
        } else if was_collected {
            LogfileStatus::Collected
        } else {
            LogfileStatus::Sealed
        };
        debug!(id = %id, status = %status, "opened logfile");
        Ok(Self::new(id, datafile, status))
    }

    /// See [`datafile::judge`].
    ///
    /// # Errors
    ///
    /// `DatafileEmpty` or `DatafileUnreadable`.
    pub fn judge(path: &Path) -> CoreResult<()> {
        datafile::judge(path)
    }

    /// Logfile ID.
    #[must_use]
    pub fn id(&self) -> FileId {
        self.id
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> LogfileStatus {
        LogfileStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Current status as text.
    #[must_use]
    pub fn status_text(&self) -> &'static str {
        self.status().as_str()
    }

    /// Moves the status forward. Returns `false` (and changes nothing) if
    /// `status` is not ahead of the current one.
    pub fn set_status(&self, status: LogfileStatus) -> bool {
        let next = status as u8;
        self.status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (next > cur).then_some(next)
            })
            .is_ok()
    }

    /// Shared access to the datafile.
    pub fn datafile(&self) -> RwLockReadGuard<'_, Datafile> {
        self.datafile.read()
    }

    pub(crate) fn datafile_mut(&self) -> RwLockWriteGuard<'_, Datafile> {
        self.datafile.write()
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> Option<PathBuf> {
        self.datafile.read().path().map(Path::to_path_buf)
    }

    /// Reserves `size` bytes (aligned) and returns their offset.
    ///
    /// The caller must have checked [`is_writeable`](Self::is_writeable).
    ///
    /// # Errors
    ///
    /// See [`Datafile::reserve`].
    pub fn reserve(&self, size: usize) -> CoreResult<usize> {
        self.datafile.read().reserve(size, 0)
    }

    /// Reserves room for the footer and returns its offset.
    ///
    /// # Errors
    ///
    /// See [`Datafile::reserve_footer`].
    pub fn reserve_footer(&self) -> CoreResult<usize> {
        self.datafile.read().reserve_footer()
    }

    /// Stamps the CRC and copies `marker` to `position`.
    ///
    /// # Errors
    ///
    /// See [`Datafile::write`].
    pub fn write(&self, position: usize, marker: &mut MarkerBuf) -> CoreResult<()> {
        self.datafile.read().write_marker(position, marker, false)
    }

    /// Bytes still available for markers, keeping room for a footer and,
    /// while nothing is written yet, for the header.
    #[must_use]
    pub fn free_size(&self) -> usize {
        let df = self.datafile.read();
        if df.is_sealed() {
            return 0;
        }
        let current = df.current_size();
        let overhead = if current == 0 {
            JOURNAL_OVERHEAD
        } else {
            aligned_size(FOOTER_MARKER_SIZE)
        };
        df.maximal_size()
            .saturating_sub(current)
            .saturating_sub(overhead)
    }

    /// Whether the datafile can no longer take writes, after a failed msync
    /// or because it was unmapped.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        matches!(
            self.datafile.read().state(),
            DatafileState::WriteError | DatafileState::Closed
        )
    }

    /// Whether a marker of `size` bytes can still be written.
    #[must_use]
    pub fn is_writeable(&self, size: usize) -> bool {
        matches!(self.status(), LogfileStatus::Empty | LogfileStatus::Open)
            && self.free_size() >= aligned_size(size)
            && !self.has_failed()
    }

    /// Whether the logfile has been sealed (or got further).
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.status() >= LogfileStatus::Sealed
    }

    /// Registers a reader. The logfile is not removed while readers exist.
    pub fn use_logfile(&self) {
        self.users.fetch_add(1, Ordering::AcqRel);
    }

    /// Unregisters a reader.
    pub fn release(&self) {
        let _ = self
            .users
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Number of registered readers.
    #[must_use]
    pub fn users(&self) -> u64 {
        self.users.load(Ordering::Acquire)
    }

    /// Notes a pending collect operation.
    pub fn increase_collect_queue_size(&self) {
        self.collect_queue_size.fetch_add(1, Ordering::AcqRel);
    }

    /// Notes a finished collect operation.
    pub fn decrease_collect_queue_size(&self) {
        let _ = self
            .collect_queue_size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Number of pending collect operations.
    #[must_use]
    pub fn collect_queue_size(&self) -> u64 {
        self.collect_queue_size.load(Ordering::Acquire)
    }

    /// Whether the collector may pick this logfile up.
    #[must_use]
    pub fn can_be_collected(&self) -> bool {
        matches!(
            self.status(),
            LogfileStatus::Sealed | LogfileStatus::CollectionRequested
        )
    }

    /// Whether the logfile may be deleted.
    #[must_use]
    pub fn can_be_removed(&self) -> bool {
        self.status() == LogfileStatus::Collected
            && self.users() == 0
            && self.collect_queue_size() == 0
    }

    /// Finishes sealing after the footer was written through a slot.
    ///
    /// # Errors
    ///
    /// See [`Datafile::finish_seal`].
    pub fn seal(&self) -> CoreResult<()> {
        self.datafile.write().finish_seal()?;
        self.set_status(LogfileStatus::Sealed);
        info!(id = %self.id, "sealed logfile");
        Ok(())
    }

    /// Writes a footer and seals a logfile that was left open by a crash.
    ///
    /// # Errors
    ///
    /// See [`Datafile::seal`].
    pub fn seal_with_footer(&self) -> CoreResult<()> {
        self.datafile.write().seal()?;
        self.set_status(LogfileStatus::Sealed);
        info!(id = %self.id, "sealed recovered logfile");
        Ok(())
    }

    /// Folds a committed marker into the tick bounds.
    pub fn update(&self, header: &MarkerHeader) {
        self.datafile.read().update_ticks(header);
    }

    /// `(tick_min, tick_max)` of the datafile.
    #[must_use]
    pub fn tick_range(&self) -> (Tick, Tick) {
        let df = self.datafile.read();
        (df.tick_min(), df.tick_max())
    }

    /// Unmaps the datafile.
    pub fn close(&self) {
        self.datafile.write().close();
    }
}

impl fmt::Debug for Logfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logfile")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("users", &self.users())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::{MarkerType, HEADER_MARKER_SIZE};
    use crate::types::TransactionId;
    use tempfile::tempdir;

    const MB: usize = 1024 * 1024;

    #[test]
    fn new_logfile_is_empty() {
        let dir = tempdir().unwrap();
        let lf = Logfile::create_new(&dir.path().join("logfile-5.db"), FileId::new(5), MB).unwrap();
        assert_eq!(lf.status(), LogfileStatus::Empty);
        assert_eq!(lf.datafile().current_size(), 0);
        assert_eq!(lf.free_size(), MB - JOURNAL_OVERHEAD);
        assert!(lf.is_writeable(1000));
        assert!(!lf.is_writeable(MB));
    }

    #[test]
    fn open_logfile_keeps_room_for_footer_only() {
        let dir = tempdir().unwrap();
        let lf = Logfile::create_new(&dir.path().join("logfile-6.db"), FileId::new(6), MB).unwrap();
        let at = lf.reserve(HEADER_MARKER_SIZE).unwrap();
        lf.write(at, &mut MarkerBuf::header(MB as u32, FileId::new(6))).unwrap();
        let free = lf.free_size();
        assert_eq!(free, MB - HEADER_MARKER_SIZE - 16);

        // an entry taking every free byte still leaves the footer its room
        let at = lf.reserve(free).unwrap();
        lf.write(at, &mut MarkerBuf::blank(free)).unwrap();
        assert_eq!(lf.free_size(), 0);
        assert!(lf.reserve(8).is_err());
        let footer_at = lf.reserve_footer().unwrap();
        assert_eq!(footer_at, MB - 16);
    }

    #[test]
    fn failed_sync_marks_logfile_failed() {
        let dir = tempdir().unwrap();
        let lf = Logfile::create_new(&dir.path().join("logfile-7.db"), FileId::new(7), MB).unwrap();
        assert!(!lf.has_failed());
        lf.close();
        assert!(lf.datafile().sync_range(0, 32).is_err());
        assert!(lf.has_failed());
        assert!(!lf.is_writeable(100));
    }

    #[test]
    fn status_moves_forward_only() {
        let dir = tempdir().unwrap();
        let lf = Logfile::create_new(&dir.path().join("logfile-1.db"), FileId::new(1), MB).unwrap();
        assert!(lf.set_status(LogfileStatus::Open));
        assert!(lf.set_status(LogfileStatus::Sealed));
        assert!(!lf.set_status(LogfileStatus::Open));
        assert_eq!(lf.status(), LogfileStatus::Sealed);
        assert_eq!(lf.status_text(), "sealed");
        assert!(lf.is_sealed());
        assert!(!lf.is_writeable(8));
    }

    #[test]
    fn users_gate_removal() {
        let dir = tempdir().unwrap();
        let lf = Logfile::create_new(&dir.path().join("logfile-1.db"), FileId::new(1), MB).unwrap();
        lf.set_status(LogfileStatus::Collected);
        assert!(lf.can_be_removed());

        lf.use_logfile();
        assert!(!lf.can_be_removed());
        lf.release();
        assert!(lf.can_be_removed());

        // release never underflows
        lf.release();
        assert_eq!(lf.users(), 0);

        lf.increase_collect_queue_size();
        assert!(!lf.can_be_removed());
        lf.decrease_collect_queue_size();
        assert!(lf.can_be_removed());
    }

    #[test]
    fn reopen_reports_status() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logfile-9.db");
        {
            let lf = Logfile::create_new(&path, FileId::new(9), MB).unwrap();
            let at = lf.reserve(HEADER_MARKER_SIZE).unwrap();
            let mut header = MarkerBuf::header(MB as u32, FileId::new(9));
            header.set_tick(9);
            lf.write(at, &mut header).unwrap();

            let mut doc = MarkerBuf::document(TransactionId::new(1), b"abc");
            doc.set_tick(10);
            let at = lf.reserve(doc.size()).unwrap();
            lf.write(at, &mut doc).unwrap();
            lf.datafile().sync().unwrap();
        }

        let lf = Logfile::open_existing(&path, FileId::new(9), false, false).unwrap();
        assert_eq!(lf.status(), LogfileStatus::Open);
        assert_eq!(lf.tick_range(), (10, 10));

        let mut footer = MarkerBuf::new(MarkerType::Footer, 16);
        footer.set_tick(11);
        let at = lf.reserve(16).unwrap();
        lf.write(at, &mut footer).unwrap();
        lf.set_status(LogfileStatus::SealRequested);
        lf.seal().unwrap();
        assert_eq!(lf.status(), LogfileStatus::Sealed);
        assert_eq!(lf.free_size(), 0);
        drop(lf);

        let lf = Logfile::open_existing(&path, FileId::new(9), true, false).unwrap();
        assert_eq!(lf.status(), LogfileStatus::Collected);
        assert!(lf.can_be_removed());
    }

    #[test]
    fn reopen_rejects_foreign_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logfile-3.db");
        drop(Datafile::create(Some(&path), FileId::new(4), MB, true).unwrap());
        assert!(matches!(
            Logfile::open_existing(&path, FileId::new(3), false, false),
            Err(CoreError::CorruptedDatafile { .. })
        ));
    }

    #[test]
    fn empty_file_is_judged_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logfile-2.db");
        drop(Logfile::create_new(&path, FileId::new(2), MB).unwrap());
        assert!(matches!(
            Logfile::judge(&path),
            Err(CoreError::DatafileEmpty)
        ));
    }
}
