//! The logfile manager.
//!
//! Owns a WAL directory: recovers its logfiles at startup, hands them to
//! the slot allocator, and runs three background threads.
//!
//! ```text
//!   writers --append--> Slots --writeable_logfile--> Inventory <-- allocator
//!                         |                              ^
//!                   sync regions                         |
//!                         v                              |
//!                    synchronizer --sealed-------------->+<-- remover
//! ```
//!
//! # Startup
//!
//! 1. Lock the directory and delete half-created `temp-<id>.db` files.
//! 2. Read SHUTDOWN for the last tick and the last sealed/collected ids.
//! 3. Open every logfile: empty ones are deleted, damaged ones fail the
//!    startup unless errors are ignored.
//! 4. Seal logfiles a crash left open, seed the tick source and slots with
//!    the highest tick found, start the threads.
//!
//! # Shutdown
//!
//! Writes are refused, the active logfile is sealed and synced, the
//! threads are stopped and SHUTDOWN is written with the shutdown time.

mod dir;
mod inventory;
mod signal;
mod state;
mod threads;

pub use dir::WalDir;
pub use state::ShutdownInfo;

use crate::config::{WalConfig, MAX_ENTRY_SIZE};
use crate::error::{CoreError, CoreResult};
use crate::logfile::{Logfile, LogfileStatus};
use crate::marker::{aligned_size, Marker, MarkerBuf, JOURNAL_OVERHEAD};
use crate::slots::{entry_size, LogfileProvider, SlotInfo, Slots};
use crate::tick::TickSource;
use crate::types::{CollectionId, DatabaseId, FileId, Tick};
use inventory::{Inventory, LogfileIds};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Counters and ids describing the WAL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalState {
    /// Tick of the most recently allocated slot.
    pub last_assigned_tick: Tick,
    /// Highest committed tick.
    pub last_committed_tick: Tick,
    /// Highest committed tick of a data marker.
    pub last_committed_data_tick: Tick,
    /// Slots returned by writers.
    pub num_events: u64,
    /// Slots returned with a sync request.
    pub num_events_sync: u64,
    /// Id of the last sealed logfile.
    pub last_sealed: u64,
    /// Id of the last collected logfile.
    pub last_collected: u64,
    /// Whether appends are accepted.
    pub allow_writes: bool,
}

/// Tick range and status of one logfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogfileRange {
    /// Logfile id.
    pub id: FileId,
    /// Backing file.
    pub path: Option<PathBuf>,
    /// Lifecycle status.
    pub status: LogfileStatus,
    /// Lowest committed tick.
    pub tick_min: Tick,
    /// Highest committed tick.
    pub tick_max: Tick,
}

#[derive(Default)]
struct Threads {
    synchronizer: Option<JoinHandle<()>>,
    allocator: Option<JoinHandle<()>>,
    remover: Option<JoinHandle<()>>,
}

/// Manages the logfiles of one WAL directory.
pub struct LogfileManager {
    inventory: Arc<Inventory>,
    slots: Arc<Slots>,
    threads: Mutex<Threads>,
    shut_down: AtomicBool,
}

impl LogfileManager {
    /// Opens the WAL in `config.directory`, recovering existing logfiles.
    ///
    /// # Errors
    ///
    /// `InvalidConfig`, `LogfileLocked` if another manager owns the
    /// directory, a corruption error for a damaged logfile (unless
    /// `ignore_logfile_errors`/`ignore_recovery_errors` allow going on),
    /// or an I/O error.
    pub fn open(config: WalConfig, ticks: Arc<dyn TickSource>) -> CoreResult<Self> {
        config.validate()?;
        let dir = WalDir::open(&config.directory)?;
        let removed = dir.remove_temp_files()?;
        if removed > 0 {
            warn!(removed, "removed incomplete logfiles");
        }

        let shutdown = ShutdownInfo::load(&dir)?;
        let clean = shutdown.as_ref().is_some_and(|s| s.shutdown_time.is_some());
        let shutdown = shutdown.unwrap_or_default();
        ticks.update(shutdown.tick);

        let mut ids = LogfileIds {
            last_sealed: shutdown.last_sealed,
            last_collected: shutdown.last_collected,
        };
        let logfiles = recover_logfiles(&config, &dir, &mut ids)?;

        let mut max_tick = shutdown.tick;
        for lf in logfiles.values() {
            max_tick = max_tick.max(lf.tick_range().1).max(lf.id().as_u64());
        }
        ticks.update(max_tick);
        info!(
            logfiles = logfiles.len(),
            last_tick = ticks.current_tick(),
            clean,
            "recovered WAL"
        );

        let inventory = Arc::new(Inventory::new(
            config.clone(),
            dir,
            Arc::clone(&ticks),
            logfiles,
            ids,
        ));
        let slots = Arc::new(Slots::new(
            &config,
            Arc::clone(&inventory) as Arc<dyn LogfileProvider>,
            ticks,
        ));
        slots.set_last_tick(inventory.ticks.current_tick());

        let manager = Self {
            inventory,
            slots,
            threads: Mutex::new(Threads::default()),
            shut_down: AtomicBool::new(false),
        };
        manager.start_threads()?;
        // SHUTDOWN without a time marks the WAL as in use
        manager.inventory.write_shutdown_info(false)?;
        manager.inventory.set_allow_writes(true);
        Ok(manager)
    }

    fn start_threads(&self) -> CoreResult<()> {
        let mut threads = self.threads.lock();

        let inventory = Arc::clone(&self.inventory);
        let slots = Arc::clone(&self.slots);
        threads.synchronizer = Some(
            thread::Builder::new()
                .name("voclog-synchronizer".to_string())
                .spawn(move || threads::run_synchronizer(inventory, slots))?,
        );

        let inventory = Arc::clone(&self.inventory);
        threads.allocator = Some(
            thread::Builder::new()
                .name("voclog-allocator".to_string())
                .spawn(move || threads::run_allocator(inventory))?,
        );

        let inventory = Arc::clone(&self.inventory);
        threads.remover = Some(
            thread::Builder::new()
                .name("voclog-remover".to_string())
                .spawn(move || threads::run_remover(inventory))?,
        );
        Ok(())
    }

    /// Appends `marker` on behalf of `(database_id, collection_id)`.
    ///
    /// A prologue marker is written first when the pair differs from the
    /// previous one in the active logfile. With `wait_for_sync` the call
    /// returns once the marker is durable.
    ///
    /// Returns the marker's tick.
    ///
    /// # Errors
    ///
    /// `ReadOnly` before recovery finished or after shutdown,
    /// `DocumentTooLarge`, `NoJournal`, `SyncTimeout`, or a write error.
    pub fn append(
        &self,
        database_id: DatabaseId,
        collection_id: CollectionId,
        marker: &mut MarkerBuf,
        wait_for_sync: bool,
    ) -> CoreResult<Tick> {
        let with_prologue = database_id.as_u64() != 0 && collection_id.as_u64() != 0;
        self.check_entry_size(marker.size(), with_prologue)?;
        let slot = self
            .slots
            .next_unused(database_id, collection_id, marker.size())?;
        self.fill_and_return(slot, marker, wait_for_sync)
    }

    /// Appends `marker` without database context; never writes a prologue.
    ///
    /// # Errors
    ///
    /// See [`append`](Self::append).
    pub fn append_raw(&self, marker: &mut MarkerBuf, wait_for_sync: bool) -> CoreResult<Tick> {
        self.check_entry_size(marker.size(), false)?;
        let slot = self.slots.next_unused_raw(marker.size())?;
        self.fill_and_return(slot, marker, wait_for_sync)
    }

    /// Rejects entries a regular logfile cannot hold, counting the prologue
    /// that may have to precede them, unless oversize entries are allowed.
    fn check_entry_size(&self, size: usize, with_prologue: bool) -> CoreResult<()> {
        if !self.inventory.allow_writes() {
            return Err(CoreError::ReadOnly);
        }
        let size = aligned_size(size);
        if size > MAX_ENTRY_SIZE {
            return Err(CoreError::too_large(size, MAX_ENTRY_SIZE));
        }
        let logfile_size = self.inventory.config.effective_logfile_size();
        let needed = entry_size(size, with_prologue);
        if !self.inventory.config.allow_oversize_entries && needed + JOURNAL_OVERHEAD > logfile_size
        {
            let limit = logfile_size - JOURNAL_OVERHEAD - (needed - size);
            return Err(CoreError::too_large(size, limit));
        }
        Ok(())
    }

    fn fill_and_return(
        &self,
        slot: SlotInfo,
        marker: &mut MarkerBuf,
        wait_for_sync: bool,
    ) -> CoreResult<Tick> {
        let tick = slot.tick();
        if let Err(err) = slot.fill(marker) {
            // keep the logfile walkable: the range must hold a valid marker
            if let Err(blank_err) = slot.fill(&mut MarkerBuf::blank(slot.size())) {
                error!(tick, "unable to blank failed slot: {blank_err}");
            }
            self.slots.return_used(slot, false, false, false)?;
            return Err(err);
        }
        self.slots
            .return_used(slot, wait_for_sync, wait_for_sync, wait_for_sync)?;
        Ok(tick)
    }

    /// Calls `f` for every committed marker with a tick in
    /// `[tick_min, tick_max]`, in logfile order, until `f` returns `false`.
    ///
    /// Logfiles are registered as in use while they are read, so the
    /// remover leaves them alone. `f` must not append to the WAL.
    ///
    /// # Errors
    ///
    /// Returns `CorruptedDatafile` if a logfile cannot be walked.
    pub fn read_range<F>(&self, tick_min: Tick, tick_max: Tick, mut f: F) -> CoreResult<()>
    where
        F: FnMut(FileId, &Marker<'_>) -> bool,
    {
        for lf in self.inventory.logfiles_for_range(tick_min, tick_max) {
            let id = lf.id();
            // snapshot before asking for in-flight slots: everything reserved
            // later lies beyond it
            let written = lf.datafile().current_size();
            let limit = self
                .slots
                .active_tick_range(id)
                .map_or(written, |active| active.offset.min(written));

            let completed = lf.datafile().iterate_until(limit, |marker| {
                let tick = marker.tick();
                if tick < tick_min || tick > tick_max {
                    return true;
                }
                f(id, marker)
            })?;
            if !completed {
                break;
            }
        }
        Ok(())
    }

    /// Makes everything appended so far durable.
    ///
    /// With `seal` the active logfile is closed with a footer and the next
    /// append goes to a new logfile.
    ///
    /// # Errors
    ///
    /// `SyncTimeout` if `wait_for_sync` and the sync did not finish in
    /// time, `NoJournal` if no slot was free for the footer.
    pub fn flush(&self, wait_for_sync: bool, seal: bool) -> CoreResult<()> {
        if seal {
            return match self.slots.flush(wait_for_sync) {
                Ok(()) | Err(CoreError::DatafileEmpty) => Ok(()),
                Err(err) => Err(err),
            };
        }
        let tick = self.slots.statistics().last_assigned_tick;
        self.inventory.signal_sync(true);
        if wait_for_sync {
            self.slots.wait_for_tick(tick)?;
        }
        Ok(())
    }

    /// Waits up to `timeout` for every allocated slot to be committed.
    /// Returns whether that happened.
    pub fn wait_for_sync(&self, timeout: Duration) -> bool {
        let tick = self.slots.statistics().last_assigned_tick;
        self.inventory.signal_sync(true);
        self.slots.wait_for_tick_within(tick, timeout)
    }

    /// The oldest logfile that is sealed but not collected yet. Logfiles
    /// are handed out in id order only.
    #[must_use]
    pub fn collectable_logfile(&self) -> Option<Arc<Logfile>> {
        self.inventory.collectable_logfile()
    }

    /// Marks logfile `id` as being collected.
    pub fn set_collection_requested(&self, id: FileId) {
        if let Some(lf) = self.inventory.get(id) {
            lf.set_status(LogfileStatus::CollectionRequested);
        }
    }

    /// Marks logfile `id` as collected and records it in SHUTDOWN. It is
    /// removed once more than `historic_logfiles` collected ones exist.
    ///
    /// # Errors
    ///
    /// Returns an error if SHUTDOWN cannot be written.
    pub fn set_collection_done(&self, id: FileId) -> CoreResult<()> {
        self.inventory.logfile_collected(id)
    }

    /// Deletes collected logfiles beyond `historic_logfiles` right away
    /// instead of waiting for the remover. Returns how many were removed.
    pub fn remove_logfiles(&self) -> usize {
        self.inventory.remove_logfiles()
    }

    /// Current counters.
    #[must_use]
    pub fn state(&self) -> WalState {
        let stats = self.slots.statistics();
        let ids = self.inventory.ids();
        WalState {
            last_assigned_tick: stats.last_assigned_tick,
            last_committed_tick: stats.last_committed_tick,
            last_committed_data_tick: stats.last_committed_data_tick,
            num_events: stats.num_events,
            num_events_sync: stats.num_events_sync,
            last_sealed: ids.last_sealed,
            last_collected: ids.last_collected,
            allow_writes: self.inventory.allow_writes(),
        }
    }

    /// Status and tick range of every logfile, in id order.
    #[must_use]
    pub fn ranges(&self) -> Vec<LogfileRange> {
        self.inventory
            .snapshot()
            .into_iter()
            .map(|lf| {
                let (tick_min, tick_max) = lf.tick_range();
                LogfileRange {
                    id: lf.id(),
                    path: lf.path(),
                    status: lf.status(),
                    tick_min,
                    tick_max,
                }
            })
            .collect()
    }

    /// All logfiles, in id order.
    #[must_use]
    pub fn logfiles(&self) -> Vec<Arc<Logfile>> {
        self.inventory.snapshot()
    }

    /// The slot allocator.
    #[must_use]
    pub fn slots(&self) -> &Slots {
        &self.slots
    }

    /// WAL directory.
    #[must_use]
    pub fn directory(&self) -> &std::path::Path {
        self.inventory.dir.path()
    }

    /// Stops the WAL: refuses writes, seals the active logfile, stops the
    /// threads and writes SHUTDOWN. Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if SHUTDOWN cannot be written.
    pub fn shutdown(&self) -> CoreResult<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!(path = ?self.directory(), "shutting down WAL");
        self.inventory.set_allow_writes(false);
        self.slots.shutdown();

        let mut threads = self.threads.lock();
        self.inventory.allocator.stop();
        join("allocator", threads.allocator.take());

        if let Err(err) = self.flush(true, true) {
            warn!("unable to seal active logfile during shutdown: {err}");
        }

        self.inventory.synchronizer.stop();
        self.inventory.remover.stop();
        join("synchronizer", threads.synchronizer.take());
        join("remover", threads.remover.take());
        drop(threads);

        self.inventory.write_shutdown_info(true)?;
        debug!("WAL shut down");
        Ok(())
    }
}

impl Drop for LogfileManager {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            error!("WAL shutdown failed: {err}");
        }
    }
}

impl std::fmt::Debug for LogfileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogfileManager")
            .field("directory", &self.directory())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn join(name: &str, handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        if handle.join().is_err() {
            error!(thread = name, "background thread panicked");
        }
    }
}

/// Opens every logfile in `dir`.
///
/// Empty logfiles are deleted. Logfiles a crash left open are sealed so
/// new writes always start in a fresh logfile.
fn recover_logfiles(
    config: &WalConfig,
    dir: &WalDir,
    ids: &mut LogfileIds,
) -> CoreResult<BTreeMap<FileId, Arc<Logfile>>> {
    let mut logfiles = BTreeMap::new();
    for id in dir.logfile_ids()? {
        let path = dir.logfile_path(id);
        match Logfile::judge(&path) {
            Ok(()) => {}
            Err(CoreError::DatafileEmpty) => {
                info!(id = %id, path = ?path, "removing empty logfile");
                fs::remove_file(&path)?;
                continue;
            }
            Err(err) if config.ignore_logfile_errors => {
                warn!(id = %id, path = ?path, "ignoring unreadable logfile: {err}");
                continue;
            }
            Err(err) => {
                error!(id = %id, path = ?path, "unable to open logfile: {err}");
                return Err(err);
            }
        }

        let was_collected = id.as_u64() <= ids.last_collected;
        let logfile =
            match Logfile::open_existing(&path, id, was_collected, config.ignore_recovery_errors) {
                Ok(lf) => lf,
                Err(err) if config.ignore_logfile_errors => {
                    warn!(id = %id, path = ?path, "ignoring damaged logfile: {err}");
                    continue;
                }
                Err(err) => {
                    error!(id = %id, path = ?path, "unable to recover logfile: {err}");
                    return Err(err);
                }
            };

        if logfile.status() == LogfileStatus::Open {
            match logfile.seal_with_footer() {
                Ok(()) => ids.last_sealed = ids.last_sealed.max(id.as_u64()),
                Err(err) => warn!(id = %id, "unable to seal recovered logfile: {err}"),
            }
        }
        logfiles.insert(id, Arc::new(logfile));
    }
    Ok(logfiles)
}
