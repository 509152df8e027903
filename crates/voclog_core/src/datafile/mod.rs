//! Memory-mapped, append-only datafiles.
//!
//! A datafile is a fixed-size mapping holding a sequence of markers:
//!
//! ```text
//! [Header][marker]...[marker][Footer]
//! ```
//!
//! The footer is only present once the datafile is sealed. Until then the
//! first marker with `size == 0` ends the valid data.
//!
//! `reserve` and `write` only need `&self`: the write cursor is an atomic,
//! so reservations never wait for readers, syncs or writers copying into
//! their disjoint reservations.

mod repair;
mod scan;
mod state;

pub use repair::{truncate_and_reseal, try_repair, RepairOutcome};
pub use scan::{Corruption, Diagnosis, ScanFix, ScanReport};
pub use state::DatafileState;

use crate::error::{CoreError, CoreResult};
use crate::marker::{
    aligned_size, Marker, MarkerBody, MarkerBuf, MarkerHeader, MarkerType, DATAFILE_VERSION,
    FOOTER_MARKER_SIZE, HEADER_MARKER_SIZE, JOURNAL_OVERHEAD, MARKER_HEADER_SIZE,
};
use crate::tick::TickSource;
use crate::types::{FileId, Tick};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, error, info, warn};
use voclog_storage::{round_to_page, AnonymousRegion, FileRegion, MappedRegion};

/// Number of bytes [`judge`] inspects.
const JUDGE_SAMPLE_SIZE: usize = 2048;

/// Tick bounds of a datafile, updatable through a shared reference.
#[derive(Debug, Default)]
struct TickBounds {
    tick_min: AtomicU64,
    tick_max: AtomicU64,
    data_min: AtomicU64,
    data_max: AtomicU64,
}

impl TickBounds {
    fn update(&self, header: &MarkerHeader) {
        let Some(marker_type) = header.marker_type() else {
            return;
        };
        if marker_type.is_bookkeeping() || header.tick == 0 {
            return;
        }
        raise_min(&self.tick_min, header.tick);
        self.tick_max.fetch_max(header.tick, Ordering::AcqRel);
        if marker_type.is_data() {
            raise_min(&self.data_min, header.tick);
            self.data_max.fetch_max(header.tick, Ordering::AcqRel);
        }
    }

    fn reset(&self) {
        for t in [&self.tick_min, &self.tick_max, &self.data_min, &self.data_max] {
            t.store(0, Ordering::Release);
        }
    }
}

/// Lowers `slot` to `tick`, treating zero as unset.
fn raise_min(slot: &AtomicU64, tick: Tick) {
    let _ = slot.fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
        (cur == 0 || tick < cur).then_some(tick)
    });
}

/// An append-only datafile backed by a memory mapping.
pub struct Datafile {
    fid: FileId,
    region: Box<dyn MappedRegion>,
    state: DatafileState,
    io_failed: AtomicBool,
    initial_size: usize,
    maximal_size: usize,
    current_size: AtomicUsize,
    synced: AtomicUsize,
    ticks: TickBounds,
    is_sealed: bool,
    full: AtomicBool,
    is_physical: bool,
}

impl Datafile {
    /// Creates a new datafile.
    ///
    /// `maximal_size` is rounded up to the page size. With `path == None`
    /// the datafile lives in anonymous memory. With `with_initial_markers`
    /// a header marker is written immediately.
    ///
    /// # Errors
    ///
    /// Returns `MaximalSizeTooSmall` if header and footer do not fit,
    /// `FilesystemFull` or `OutOfMemoryMmap` if the OS refuses the space.
    pub fn create(
        path: Option<&Path>,
        fid: FileId,
        maximal_size: usize,
        with_initial_markers: bool,
    ) -> CoreResult<Self> {
        let size = round_to_page(maximal_size).unwrap_or(maximal_size);
        if size < JOURNAL_OVERHEAD {
            return Err(CoreError::MaximalSizeTooSmall {
                size: maximal_size,
                minimum: JOURNAL_OVERHEAD,
            });
        }
        let header_size = u32::try_from(size)
            .map_err(|_| CoreError::illegal_state(format!("datafile size {size} exceeds 4 GiB")))?;

        let region: Box<dyn MappedRegion> = match path {
            Some(p) => Box::new(FileRegion::create(p, size)?),
            None => Box::new(AnonymousRegion::new(size)?),
        };

        let mut datafile = Self::with_region(fid, region, DatafileState::Write);
        datafile.initial_size = size;
        datafile.maximal_size = size;

        if with_initial_markers {
            let position = datafile.reserve(HEADER_MARKER_SIZE, 0)?;
            let mut header = MarkerBuf::header(header_size, fid);
            header.set_tick(fid.as_u64());
            datafile.stamp_and_write(position, &mut header, false)?;
        }

        debug!(fid = %fid, size, path = ?datafile.path(), "created datafile");
        Ok(datafile)
    }

    fn with_region(fid: FileId, region: Box<dyn MappedRegion>, state: DatafileState) -> Self {
        let is_physical = region.path().is_some();
        let len = region.len();
        Self {
            fid,
            region,
            state,
            io_failed: AtomicBool::new(false),
            initial_size: len,
            maximal_size: len,
            current_size: AtomicUsize::new(0),
            synced: AtomicUsize::new(0),
            ticks: TickBounds::default(),
            is_sealed: false,
            full: AtomicBool::new(false),
            is_physical,
        }
    }

    /// Opens an existing datafile read-write and runs the recovery scanner.
    ///
    /// Sealed datafiles are remapped read-only.
    ///
    /// # Errors
    ///
    /// Returns the scanner's diagnosis if the file is corrupted and
    /// `ignore_failures` is false.
    pub fn open(path: &Path, ignore_failures: bool) -> CoreResult<Self> {
        Self::open_with_report(path, ignore_failures).map(|(datafile, _)| datafile)
    }

    /// Like [`open`](Self::open), also returning the scan report.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn open_with_report(path: &Path, ignore_failures: bool) -> CoreResult<(Self, ScanReport)> {
        let region = FileRegion::open(path)?;
        Self::from_region(Box::new(region), ignore_failures)
    }

    /// Opens an existing datafile without write access.
    ///
    /// Used by offline tools; corruption is diagnosed but never repaired.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be mapped or lacks a header.
    pub fn open_read_only(path: &Path) -> CoreResult<(Self, ScanReport)> {
        let region = FileRegion::open_read_only(path)?;
        let mut datafile = Self::prepare(Box::new(region))?;
        let report = datafile.scan(false);
        Ok((datafile, report))
    }

    fn prepare(region: Box<dyn MappedRegion>) -> CoreResult<Self> {
        let len = region.len();
        if len < HEADER_MARKER_SIZE {
            return Err(CoreError::unreadable(format!(
                "file of {len} bytes cannot hold a header marker"
            )));
        }
        let data = region.read(0, len)?;
        let marker = Marker::read(data, 0)?;
        let (fid, initial_size) = match marker.body()? {
            MarkerBody::Header {
                version,
                maximal_size,
                fid,
            } => {
                if version != DATAFILE_VERSION {
                    return Err(CoreError::corrupted(format!(
                        "unsupported datafile version {version}"
                    )));
                }
                (fid, maximal_size as usize)
            }
            other => {
                return Err(CoreError::corrupted(format!(
                    "first marker is not a header: {other:?}"
                )))
            }
        };

        let state = if region.is_writable() {
            DatafileState::Write
        } else {
            DatafileState::Read
        };
        let mut datafile = Self::with_region(fid, region, state);
        datafile.initial_size = initial_size;
        Ok(datafile)
    }

    fn from_region(
        region: Box<dyn MappedRegion>,
        ignore_failures: bool,
    ) -> CoreResult<(Self, ScanReport)> {
        let mut datafile = Self::prepare(region)?;
        let report = datafile.try_scan(ignore_failures)?;
        if !report.ok {
            let err = report
                .diagnosis
                .as_ref()
                .map_or_else(|| CoreError::corrupted("scan failed"), Diagnosis::to_error);
            error!(fid = %datafile.fid, path = ?datafile.path(), "cannot open datafile: {err}");
            return Err(err);
        }

        if report.repaired() && datafile.region.is_writable() {
            datafile.region.sync()?;
        }
        let current = datafile.current_size();
        if datafile.is_sealed && datafile.state == DatafileState::Write {
            datafile.region.protect()?;
            datafile.state = DatafileState::Read;
            datafile.maximal_size = current;
        }
        datafile.synced.store(current, Ordering::Release);
        Ok((datafile, report))
    }

    /// File ID.
    #[must_use]
    pub fn fid(&self) -> FileId {
        self.fid
    }

    /// Backing file path, `None` for anonymous datafiles.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.region.path()
    }

    /// Current state. A failed I/O operation overrides the stored state.
    #[must_use]
    pub fn state(&self) -> DatafileState {
        if self.io_failed.load(Ordering::Acquire) {
            DatafileState::WriteError
        } else {
            self.state
        }
    }

    /// Size the datafile was created with.
    #[must_use]
    pub fn initial_size(&self) -> usize {
        self.initial_size
    }

    /// Upper bound of the datafile; equals `current_size` once sealed.
    #[must_use]
    pub fn maximal_size(&self) -> usize {
        self.maximal_size
    }

    /// Bytes of valid markers, including padding.
    #[must_use]
    pub fn current_size(&self) -> usize {
        self.current_size.load(Ordering::Acquire)
    }

    /// Bytes known to be durable.
    #[must_use]
    pub fn synced_size(&self) -> usize {
        self.synced.load(Ordering::Acquire)
    }

    /// Whether a footer has been written and the file frozen.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.is_sealed
    }

    /// Whether the last reservation failed for lack of room.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.full.load(Ordering::Acquire)
    }

    /// Whether the datafile is backed by a file on disk.
    #[must_use]
    pub fn is_physical(&self) -> bool {
        self.is_physical
    }

    /// Smallest tick of any non-header/footer marker (0 if none).
    #[must_use]
    pub fn tick_min(&self) -> Tick {
        self.ticks.tick_min.load(Ordering::Acquire)
    }

    /// Largest tick of any non-header/footer marker (0 if none).
    #[must_use]
    pub fn tick_max(&self) -> Tick {
        self.ticks.tick_max.load(Ordering::Acquire)
    }

    /// Smallest tick of any document or remove marker (0 if none).
    #[must_use]
    pub fn data_min(&self) -> Tick {
        self.ticks.data_min.load(Ordering::Acquire)
    }

    /// Largest tick of any document or remove marker (0 if none).
    #[must_use]
    pub fn data_max(&self) -> Tick {
        self.ticks.data_max.load(Ordering::Acquire)
    }

    /// Folds a marker header into the tick bounds.
    pub fn update_ticks(&self, header: &MarkerHeader) {
        self.ticks.update(header);
    }

    /// Borrows bytes of the mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is outside the mapping.
    pub fn read(&self, offset: usize, len: usize) -> CoreResult<&[u8]> {
        Ok(self.region.read(offset, len)?)
    }

    fn check_writable(&self) -> CoreResult<()> {
        match self.state() {
            DatafileState::Write => Ok(()),
            DatafileState::Read => Err(CoreError::ReadOnly),
            other => Err(CoreError::illegal_state(format!(
                "datafile {} is in state {other}",
                self.fid
            ))),
        }
    }

    /// Reserves room for a marker of `size` bytes and returns its position.
    ///
    /// `max_journal_size` is the size of the largest journal the caller
    /// could create; markers that would not even fit into a fresh journal
    /// of that size fail with `DocumentTooLarge`.
    ///
    /// # Errors
    ///
    /// `ReadOnly`, `IllegalState`, `DocumentTooLarge`, or `DatafileFull`
    /// (which also sets the `full` flag).
    pub fn reserve(&self, size: usize, max_journal_size: usize) -> CoreResult<usize> {
        self.reserve_with_footer(size, max_journal_size, aligned_size(FOOTER_MARKER_SIZE))
    }

    /// Reserves the footer. Unlike [`Datafile::reserve`] it may use the
    /// room kept back for the footer.
    ///
    /// # Errors
    ///
    /// See [`Datafile::reserve`].
    pub fn reserve_footer(&self) -> CoreResult<usize> {
        self.reserve_with_footer(FOOTER_MARKER_SIZE, 0, 0)
    }

    fn reserve_with_footer(
        &self,
        size: usize,
        max_journal_size: usize,
        footer_room: usize,
    ) -> CoreResult<usize> {
        let size = aligned_size(size);
        self.check_writable()?;

        if size + JOURNAL_OVERHEAD > self.maximal_size {
            // Larger than this journal. Acceptable only if the caller could
            // create a big enough journal.
            if max_journal_size <= self.maximal_size || size + JOURNAL_OVERHEAD > max_journal_size
            {
                return Err(CoreError::too_large(
                    size,
                    self.maximal_size.max(max_journal_size).saturating_sub(JOURNAL_OVERHEAD),
                ));
            }
        }

        let maximal = self.maximal_size;
        self.current_size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current + size + footer_room <= maximal).then_some(current + size)
            })
            .map_err(|_| {
                self.full.store(true, Ordering::Release);
                CoreError::DatafileFull
            })
    }

    /// Copies a complete marker to `position`.
    ///
    /// The number of bytes copied is taken from the marker's own size field.
    ///
    /// # Errors
    ///
    /// `ReadOnly`/`IllegalState` if not writable, `IllegalState` if the
    /// position is outside the datafile, `FilesystemFull`/`SysError` if a
    /// forced sync fails (the datafile then enters `WriteError`).
    pub fn write(&self, position: usize, marker: &[u8], force_sync: bool) -> CoreResult<()> {
        self.check_writable()?;
        if position >= self.maximal_size {
            return Err(CoreError::illegal_state(format!(
                "write position {position} outside datafile of {} bytes",
                self.maximal_size
            )));
        }
        let size = MarkerHeader::parse(marker)
            .map(|h| h.size as usize)
            .filter(|&s| s >= MARKER_HEADER_SIZE && s <= marker.len())
            .ok_or_else(|| CoreError::illegal_state("marker size field does not match buffer"))?;

        self.region.write(position, &marker[..size])?;

        if force_sync {
            self.sync_range(position, size)?;
        }
        Ok(())
    }

    /// Assigns a tick if the marker has none, stamps the CRC, and writes it.
    ///
    /// CRCs are skipped for anonymous datafiles, which cannot be corrupted
    /// independently of the process.
    ///
    /// # Errors
    ///
    /// See [`write`](Self::write).
    pub fn write_with_crc(
        &self,
        position: usize,
        marker: &mut MarkerBuf,
        ticks: &dyn TickSource,
        force_sync: bool,
    ) -> CoreResult<()> {
        if marker.tick() == 0 {
            marker.set_tick(ticks.next_tick());
        }
        self.stamp_and_write(position, marker, force_sync)
    }

    fn stamp_and_write(
        &self,
        position: usize,
        marker: &mut MarkerBuf,
        force_sync: bool,
    ) -> CoreResult<()> {
        self.write_marker(position, marker, force_sync)?;
        self.ticks.update(&marker.header_fields());
        Ok(())
    }

    /// Stamps the CRC and writes the marker without touching the tick
    /// bounds. Slots fold ticks in when the write is committed.
    pub(crate) fn write_marker(
        &self,
        position: usize,
        marker: &mut MarkerBuf,
        force_sync: bool,
    ) -> CoreResult<()> {
        if self.is_physical {
            marker.finalize_crc();
        }
        self.write(position, marker.as_bytes(), force_sync)
    }

    /// Flushes `[offset, offset + len)` to disk.
    ///
    /// # Errors
    ///
    /// `FilesystemFull` or `SysError`; the datafile enters `WriteError`.
    pub fn sync_range(&self, offset: usize, len: usize) -> CoreResult<()> {
        self.region.flush_range(offset, len).map_err(|err| {
            self.io_failed.store(true, Ordering::Release);
            error!(fid = %self.fid, offset, len, "msync failed: {err}");
            CoreError::from_sync(err)
        })?;
        self.synced.fetch_max(offset + len, Ordering::AcqRel);
        Ok(())
    }

    /// Flushes everything written since the last sync.
    ///
    /// # Errors
    ///
    /// See [`sync_range`](Self::sync_range).
    pub fn sync(&self) -> CoreResult<()> {
        let current = self.current_size();
        let synced = self.synced_size().min(current);
        if synced >= current {
            return Ok(());
        }
        self.sync_range(synced, current - synced)
    }

    /// Writes a footer with `tick = tick_max`, then syncs, truncates and
    /// protects the datafile.
    ///
    /// # Errors
    ///
    /// `AlreadySealed`, `ReadOnly`, `IllegalState`, or an I/O error.
    pub fn seal(&mut self) -> CoreResult<()> {
        if self.is_sealed {
            return Err(CoreError::AlreadySealed);
        }
        self.check_writable()?;

        let mut footer = MarkerBuf::footer();
        footer.set_tick(self.tick_max());
        let position = self.reserve_footer()?;
        self.stamp_and_write(position, &mut footer, false)?;

        self.finish_seal()
    }

    /// Completes sealing after the footer has already been written.
    ///
    /// Syncs the used range, truncates the file to `current_size`, remaps it
    /// read-only and freezes `maximal_size`.
    ///
    /// # Errors
    ///
    /// `AlreadySealed`, `ReadOnly`, `IllegalState`, or an I/O error (the
    /// datafile then enters `WriteError`).
    pub fn finish_seal(&mut self) -> CoreResult<()> {
        if self.is_sealed {
            return Err(CoreError::AlreadySealed);
        }
        self.check_writable()?;

        let current = self.current_size();
        self.sync_range(0, current)?;

        if let Err(err) = self.region.truncate_and_protect(current) {
            self.io_failed.store(true, Ordering::Release);
            error!(fid = %self.fid, "cannot truncate datafile while sealing: {err}");
            return Err(CoreError::from_sync(err));
        }

        self.is_sealed = true;
        self.state = DatafileState::Read;
        self.maximal_size = current;
        info!(fid = %self.fid, size = current, "sealed datafile");
        Ok(())
    }

    /// Walks markers from the start of the datafile.
    ///
    /// Stops at the first marker with `size == 0`, at the end of the used
    /// range, or when `f` returns `false`. Returns `false` if `f` stopped
    /// the iteration.
    ///
    /// # Errors
    ///
    /// Returns `CorruptedDatafile` if a marker overruns the used range.
    pub fn iterate<F>(&self, f: F) -> CoreResult<bool>
    where
        F: FnMut(&Marker<'_>) -> bool,
    {
        self.iterate_until(self.current_size(), f)
    }

    /// Like [`iterate`](Self::iterate), but ignores everything from `limit`
    /// on, so markers still being written are never looked at.
    ///
    /// # Errors
    ///
    /// Returns `CorruptedDatafile` if a marker overruns `limit`.
    pub fn iterate_until<F>(&self, limit: usize, mut f: F) -> CoreResult<bool>
    where
        F: FnMut(&Marker<'_>) -> bool,
    {
        let end = limit.min(self.current_size()).min(self.region.len());
        let data = self.region.read(0, end)?;
        let mut position = 0;
        while position + MARKER_HEADER_SIZE <= end {
            let Some(header) = MarkerHeader::parse(&data[position..]) else {
                break;
            };
            if header.size == 0 {
                break;
            }
            let marker = Marker::read(data, position)?;
            if !f(&marker) {
                return Ok(false);
            }
            position += marker.header().aligned_size();
        }
        Ok(true)
    }

    /// Renames the backing file.
    ///
    /// # Errors
    ///
    /// Returns an error and enters `RenameError` if the rename fails.
    pub fn rename(&mut self, new_path: &Path) -> CoreResult<()> {
        let old = self.path().map(Path::to_path_buf);
        if let Err(err) = self.region.rename(new_path) {
            self.state = DatafileState::RenameError;
            error!(fid = %self.fid, from = ?old, to = ?new_path, "cannot rename datafile: {err}");
            return Err(err.into());
        }
        debug!(fid = %self.fid, from = ?old, to = ?new_path, "renamed datafile");
        Ok(())
    }

    /// Unmaps the datafile.
    pub fn close(&mut self) {
        self.region.close();
        self.state = DatafileState::Closed;
    }

    /// Logically truncates at `position` after unrecoverable damage.
    ///
    /// Everything from `position` on becomes unreachable and the datafile
    /// is treated as full, sealed and read-only.
    pub fn fix(&mut self, position: usize) {
        warn!(
            fid = %self.fid,
            path = ?self.path(),
            position,
            "datafile is corrupted; ignoring all data beyond this position"
        );
        *self.current_size.get_mut() = position;
        self.maximal_size = position;
        *self.full.get_mut() = true;
        self.is_sealed = true;
        self.state = DatafileState::Read;
    }
}

impl fmt::Debug for Datafile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datafile")
            .field("fid", &self.fid)
            .field("path", &self.path())
            .field("state", &self.state())
            .field("current_size", &self.current_size())
            .field("maximal_size", &self.maximal_size)
            .field("is_sealed", &self.is_sealed)
            .finish_non_exhaustive()
    }
}

/// Pre-flight check for a candidate datafile on disk.
///
/// Reads the first 2 KiB.
///
/// # Errors
///
/// `DatafileEmpty` if every byte read is zero (the file can be deleted),
/// `DatafileUnreadable` if the file is too short to hold a header marker.
pub fn judge(path: &Path) -> CoreResult<()> {
    let mut file = File::open(path)?;
    let mut sample = vec![0u8; JUDGE_SAMPLE_SIZE];
    let mut len = 0;
    while len < sample.len() {
        let n = file.read(&mut sample[len..])?;
        if n == 0 {
            break;
        }
        len += n;
    }
    let sample = &sample[..len];

    if sample.iter().all(|&b| b == 0) {
        return Err(CoreError::DatafileEmpty);
    }
    if len < HEADER_MARKER_SIZE {
        return Err(CoreError::unreadable(format!(
            "{} is only {len} bytes long",
            path.display()
        )));
    }
    Ok(())
}

/// Returns the marker type at `position`, if one can be read there.
pub(crate) fn marker_type_at(datafile: &Datafile, position: usize) -> Option<MarkerType> {
    datafile
        .read(position, MARKER_HEADER_SIZE)
        .ok()
        .and_then(MarkerHeader::parse)
        .and_then(|h| h.marker_type())
}

/// `<path>` with `suffix` appended to the file name.
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::check_crc;
    use crate::tick::TickServer;
    use crate::types::TransactionId;
    use tempfile::tempdir;

    const KB64: usize = 64 * 1024;

    fn document(size: usize) -> MarkerBuf {
        MarkerBuf::document(TransactionId::new(1), &vec![0x5A; size - 24])
    }

    #[test]
    fn create_with_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("datafile-1.db");
        let df = Datafile::create(Some(&path), FileId::new(1), KB64, true).unwrap();

        assert_eq!(df.state(), DatafileState::Write);
        assert_eq!(df.current_size(), aligned_size(HEADER_MARKER_SIZE));
        assert_eq!(df.maximal_size(), KB64);
        assert!(df.is_physical());
        let data = df.read(0, df.current_size()).unwrap();
        assert!(check_crc(data, 0));
    }

    #[test]
    fn create_rounds_to_page() {
        let df = Datafile::create(None, FileId::new(1), 1000, false).unwrap();
        assert_eq!(df.maximal_size(), voclog_storage::page_size());
        assert!(!df.is_physical());
        assert_eq!(df.current_size(), 0);
    }

    #[test]
    fn create_rejects_zero_size() {
        assert!(matches!(
            Datafile::create(None, FileId::new(1), 0, false),
            Err(CoreError::MaximalSizeTooSmall { .. })
        ));
    }

    #[test]
    fn capacity_boundary() {
        let df = Datafile::create(None, FileId::new(1), KB64, true).unwrap();
        df.reserve(1000, 0).unwrap();
        let free = df.maximal_size() - df.current_size() - aligned_size(FOOTER_MARKER_SIZE);

        let sample = Datafile::create(None, FileId::new(2), KB64, true).unwrap();
        sample.reserve(1000, 0).unwrap();
        assert!(matches!(
            sample.reserve(free + 8, 0),
            Err(CoreError::DatafileFull)
        ));
        assert!(sample.is_full());

        let before = df.current_size();
        assert_eq!(df.reserve(free, 0).unwrap(), before);
        assert_eq!(df.current_size(), df.maximal_size() - 16);
        assert!(!df.is_full());
    }

    #[test]
    fn reserve_too_large_for_any_journal() {
        let df = Datafile::create(None, FileId::new(1), KB64, true).unwrap();
        assert!(matches!(
            df.reserve(KB64, 0),
            Err(CoreError::DocumentTooLarge { .. })
        ));
        // would fit into a bigger journal: the caller must rotate
        assert!(matches!(
            df.reserve(KB64, 4 * KB64),
            Err(CoreError::DatafileFull)
        ));
        assert!(matches!(
            df.reserve(8 * KB64, 4 * KB64),
            Err(CoreError::DocumentTooLarge { .. })
        ));
    }

    #[test]
    fn write_with_crc_assigns_tick() {
        let ticks = TickServer::new(100);
        let dir = tempdir().unwrap();
        let df =
            Datafile::create(Some(&dir.path().join("d.db")), FileId::new(1), KB64, true).unwrap();
        let mut marker = document(100);
        let position = df.reserve(marker.size(), 0).unwrap();
        df.write_with_crc(position, &mut marker, &ticks, false).unwrap();

        assert_eq!(marker.tick(), 101);
        assert_eq!(df.tick_min(), 101);
        assert_eq!(df.tick_max(), 101);
        assert_eq!(df.data_max(), 101);
        assert!(check_crc(df.read(0, df.current_size()).unwrap(), position));
    }

    #[test]
    fn write_out_of_bounds_fails() {
        let df = Datafile::create(None, FileId::new(1), KB64, false).unwrap();
        let marker = MarkerBuf::footer();
        assert!(matches!(
            df.write(KB64, marker.as_bytes(), false),
            Err(CoreError::IllegalState { .. })
        ));
    }

    #[test]
    fn iterate_stops_at_zero_size() {
        let ticks = TickServer::new(0);
        let df = Datafile::create(None, FileId::new(1), KB64, true).unwrap();
        for _ in 0..3 {
            let mut marker = document(40);
            let position = df.reserve(40, 0).unwrap();
            df.write_with_crc(position, &mut marker, &ticks, false).unwrap();
        }
        let mut positions = Vec::new();
        df.iterate(|m| {
            positions.push(m.position());
            true
        })
        .unwrap();
        assert_eq!(positions, vec![0, 32, 72, 112]);

        let mut seen = 0;
        let finished = df
            .iterate(|_| {
                seen += 1;
                seen < 2
            })
            .unwrap();
        assert!(!finished);
        assert_eq!(seen, 2);
    }

    #[test]
    fn seal_twice_fails() {
        let dir = tempdir().unwrap();
        let mut df =
            Datafile::create(Some(&dir.path().join("d.db")), FileId::new(1), KB64, true).unwrap();
        df.seal().unwrap();
        let (current, maximal) = (df.current_size(), df.maximal_size());

        assert!(matches!(df.seal(), Err(CoreError::AlreadySealed)));
        assert_eq!(df.current_size(), current);
        assert_eq!(df.maximal_size(), maximal);
        assert_eq!(current, maximal);
        assert_eq!(df.state(), DatafileState::Read);
        assert!(matches!(df.reserve(8, 0), Err(CoreError::ReadOnly)));
    }

    #[test]
    fn seal_truncates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("d.db");
        let mut df = Datafile::create(Some(&path), FileId::new(1), KB64, true).unwrap();
        df.seal().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 48);
    }

    #[test]
    fn rename_and_close() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("temp-1.db");
        let to = dir.path().join("logfile-1.db");
        let mut df = Datafile::create(Some(&from), FileId::new(1), KB64, true).unwrap();
        df.rename(&to).unwrap();
        assert_eq!(df.path(), Some(to.as_path()));

        df.close();
        assert_eq!(df.state(), DatafileState::Closed);
        assert!(df.read(0, 1).is_err());
    }

    #[test]
    fn judge_files() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty.db");
        std::fs::write(&empty, vec![0u8; 8192]).unwrap();
        assert!(matches!(judge(&empty), Err(CoreError::DatafileEmpty)));

        let short = dir.path().join("short.db");
        std::fs::write(&short, [1u8; 10]).unwrap();
        assert!(matches!(
            judge(&short),
            Err(CoreError::DatafileUnreadable { .. })
        ));

        let good = dir.path().join("good.db");
        drop(Datafile::create(Some(&good), FileId::new(1), KB64, true).unwrap());
        assert!(judge(&good).is_ok());
    }

    #[test]
    fn with_suffix_appends() {
        assert_eq!(
            with_suffix(Path::new("/a/logfile-1.db"), ".corrupted"),
            PathBuf::from("/a/logfile-1.db.corrupted")
        );
    }
}
