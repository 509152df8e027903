//! The WAL slot allocator.
//!
//! Slots form a fixed ring. Writers take slots in ring order under a single
//! mutex, each slot owning a disjoint, reserved byte range of the active
//! logfile, then copy their markers in without holding the lock. The
//! synchronizer drains the ring from the other end: consecutive returned
//! slots of the same logfile are merged into one [`SyncRegion`], synced
//! with a single `msync`, and committed together (group commit).
//!
//! ```text
//!            recycle_index           handout_index
//!                 v                        v
//! ... [ unused ][ R ][ R ][ U ][ R ][ unused ][ unused ] ...
//!                 \_______/
//!                sync region (stops at the first Used slot)
//! ```
//!
//! Ticks are assigned under the mutex, so ring order is tick order and
//! committing in ring order keeps `last_committed_tick` monotonic.
//!
//! Header, footer and prologue markers go through slots as well, written
//! by the allocator itself and returned immediately.
//!
//! A region whose msync fails is released without being committed. Its
//! ticks are remembered so waiters get an error instead of a timeout, and
//! the logfile is retired on the next allocation.

mod region;
mod slot;

pub use region::SyncRegion;
pub use slot::SlotInfo;

use crate::config::WalConfig;
use crate::error::{CoreError, CoreResult};
use crate::logfile::{Logfile, LogfileStatus};
use crate::marker::{
    aligned_size, MarkerBuf, MarkerHeader, MarkerType, MARKER_HEADER_SIZE, PROLOGUE_MARKER_SIZE,
};
use crate::tick::TickSource;
use crate::types::{CollectionId, DatabaseId, FileId, Tick};
use parking_lot::{Condvar, Mutex, MutexGuard};
use slot::Slot;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Free slots required before handing out a payload slot: footer, header,
/// prologue and the payload itself may all be needed.
const HEADROOM: usize = 4;

/// Pause between attempts to obtain a writeable logfile.
const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Failed sync regions remembered for waiters.
const MAX_SYNC_FAILURES: usize = 64;

/// Bytes an entry of `size` occupies in a logfile, including the prologue
/// written ahead of it when `with_prologue` is set.
#[must_use]
pub fn entry_size(size: usize, with_prologue: bool) -> usize {
    aligned_size(size) + if with_prologue { PROLOGUE_MARKER_SIZE } else { 0 }
}

/// Supplies logfiles to the allocator.
///
/// Implementations must not call back into [`Slots`]: these methods run
/// while the slots mutex is held.
pub trait LogfileProvider: Send + Sync {
    /// Returns an `Empty` or `Open` logfile with at least `size` free
    /// bytes, or `None` if none is ready yet (the allocator retries).
    ///
    /// # Errors
    ///
    /// Errors abort the allocation.
    fn writeable_logfile(&self, size: usize) -> CoreResult<Option<Arc<Logfile>>>;

    /// Called after the footer of `logfile` was handed out.
    fn seal_requested(&self, logfile: &Arc<Logfile>);

    /// Wakes the synchronizer.
    fn signal_sync(&self, wait_for_sync: bool);
}

/// Snapshot of allocator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotsStatistics {
    /// Next slot to hand out.
    pub handout_index: usize,
    /// Next slot to recycle.
    pub recycle_index: usize,
    /// Slots available for handout.
    pub free_slots: usize,
    /// Tick of the most recently handed out slot.
    pub last_assigned_tick: Tick,
    /// Tick of the most recently committed slot.
    pub last_committed_tick: Tick,
    /// Like `last_committed_tick`, header and footer markers excluded.
    pub last_committed_data_tick: Tick,
    /// Slots returned by writers.
    pub num_events: u64,
    /// Slots returned with a sync request.
    pub num_events_sync: u64,
}

/// Slots of one logfile still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveRange {
    /// Offset of the oldest in-flight slot. Everything before it is
    /// committed.
    pub offset: usize,
    /// Tick of the oldest in-flight slot.
    pub tick_min: Tick,
    /// Tick of the newest in-flight slot.
    pub tick_max: Tick,
}

/// Ticks of a region whose msync failed.
#[derive(Debug)]
struct SyncFailure {
    tick_min: Tick,
    tick_max: Tick,
    message: String,
}

struct SlotsInner {
    slots: Vec<Slot>,
    handout_index: usize,
    recycle_index: usize,
    free_slots: usize,
    logfile: Option<Arc<Logfile>>,
    last_database_id: DatabaseId,
    last_collection_id: CollectionId,
    last_assigned_tick: Tick,
    last_committed_tick: Tick,
    last_committed_data_tick: Tick,
    num_events: u64,
    num_events_sync: u64,
    failures: VecDeque<SyncFailure>,
    shutdown: bool,
}

impl SlotsInner {
    fn hand_out(&mut self, logfile: &Arc<Logfile>, offset: usize, size: usize, tick: Tick) -> usize {
        let index = self.handout_index;
        self.slots[index].hand_out(Arc::clone(logfile), offset, size, tick);
        self.handout_index = (index + 1) % self.slots.len();
        self.free_slots -= 1;
        self.last_assigned_tick = tick;
        index
    }

    fn in_use(&self) -> usize {
        self.slots.len() - self.free_slots
    }

    fn forget_context(&mut self) {
        self.last_database_id = DatabaseId::default();
        self.last_collection_id = CollectionId::default();
    }

    fn sync_failure(&self, tick: Tick) -> Option<&SyncFailure> {
        self.failures
            .iter()
            .find(|f| f.tick_min <= tick && tick <= f.tick_max)
    }
}

/// The slot allocator.
pub struct Slots {
    inner: Mutex<SlotsInner>,
    changed: Condvar,
    provider: Arc<dyn LogfileProvider>,
    ticks: Arc<dyn TickSource>,
    allocation_timeout: Duration,
    sync_timeout: Duration,
}

impl Slots {
    /// Creates a ring of `config.number_of_slots` slots.
    pub fn new(
        config: &WalConfig,
        provider: Arc<dyn LogfileProvider>,
        ticks: Arc<dyn TickSource>,
    ) -> Self {
        let count = config.number_of_slots.max(HEADROOM);
        Self {
            inner: Mutex::new(SlotsInner {
                slots: (0..count).map(|_| Slot::new()).collect(),
                handout_index: 0,
                recycle_index: 0,
                free_slots: count,
                logfile: None,
                last_database_id: DatabaseId::default(),
                last_collection_id: CollectionId::default(),
                last_assigned_tick: 0,
                last_committed_tick: 0,
                last_committed_data_tick: 0,
                num_events: 0,
                num_events_sync: 0,
                failures: VecDeque::new(),
                shutdown: false,
            }),
            changed: Condvar::new(),
            provider,
            ticks,
            allocation_timeout: config.allocation_timeout,
            sync_timeout: config.sync_timeout,
        }
    }

    /// Hands out a slot of `size` bytes for a marker belonging to
    /// `(database_id, collection_id)`.
    ///
    /// A prologue marker is written first whenever the pair is non-zero and
    /// differs from the last one written to the active logfile. Rotates to
    /// a new logfile when the active one lacks room or failed to sync.
    ///
    /// # Errors
    ///
    /// `RequestCanceled` after [`shutdown`](Self::shutdown), `NoJournal` if
    /// no slot or logfile became available within the allocation timeout,
    /// or any error writing the bookkeeping markers.
    pub fn next_unused(
        &self,
        database_id: DatabaseId,
        collection_id: CollectionId,
        size: usize,
    ) -> CoreResult<SlotInfo> {
        let size = aligned_size(size);
        let has_context = database_id.as_u64() != 0 && collection_id.as_u64() != 0;
        let deadline = Instant::now() + self.allocation_timeout;
        let mut inner = self.inner.lock();

        loop {
            if inner.shutdown {
                return Err(CoreError::RequestCanceled);
            }

            if inner.free_slots < HEADROOM {
                self.wait_for_slots(&mut inner, HEADROOM, deadline)?;
                continue;
            }

            let needs_prologue = has_context
                && (inner.last_database_id, inner.last_collection_id)
                    != (database_id, collection_id);
            let needed = entry_size(size, needs_prologue);

            let active = match inner.logfile.clone() {
                Some(lf) if lf.status() != LogfileStatus::Open => {
                    inner.logfile = None;
                    continue;
                }
                Some(lf) if lf.has_failed() => {
                    self.retire_failed(&mut inner, &lf);
                    continue;
                }
                Some(lf) if lf.free_size() < needed => {
                    self.close_active(&mut inner, &lf)?;
                    continue;
                }
                Some(lf) => lf,
                None => {
                    if self.open_logfile(&mut inner, needed)? {
                        continue;
                    }
                    if Instant::now() >= deadline {
                        warn!(size, "no writeable logfile available");
                        return Err(CoreError::NoJournal);
                    }
                    MutexGuard::unlocked(&mut inner, || thread::sleep(RETRY_INTERVAL));
                    continue;
                }
            };

            if needs_prologue {
                let prologue = MarkerBuf::prologue(database_id, collection_id);
                match self.write_internal(&mut inner, &active, prologue, false) {
                    Ok(_) => {}
                    Err(_) if active.has_failed() => {
                        self.retire_failed(&mut inner, &active);
                        continue;
                    }
                    Err(err) => return Err(err),
                }
                inner.last_database_id = database_id;
                inner.last_collection_id = collection_id;
            }

            let offset = match active.reserve(size) {
                Ok(offset) => offset,
                Err(_) if active.has_failed() => {
                    self.retire_failed(&mut inner, &active);
                    continue;
                }
                Err(err) => return Err(err),
            };
            let tick = self.ticks.next_tick();
            let index = inner.hand_out(&active, offset, size, tick);
            return Ok(SlotInfo {
                index,
                logfile: active,
                offset,
                size,
                tick,
            });
        }
    }

    /// Like [`next_unused`](Self::next_unused) without database context;
    /// never writes a prologue.
    ///
    /// # Errors
    ///
    /// See [`next_unused`](Self::next_unused).
    pub fn next_unused_raw(&self, size: usize) -> CoreResult<SlotInfo> {
        self.next_unused(DatabaseId::default(), CollectionId::default(), size)
    }

    /// Returns a filled slot.
    ///
    /// With `wait_until_sync_done` the call blocks until the slot's tick is
    /// committed.
    ///
    /// # Errors
    ///
    /// `SyncTimeout` if the tick was not committed within the sync timeout,
    /// `SysError` if syncing it failed.
    pub fn return_used(
        &self,
        slot: SlotInfo,
        wake_synchronizer: bool,
        wait_for_sync: bool,
        wait_until_sync_done: bool,
    ) -> CoreResult<()> {
        let tick = slot.tick;
        {
            let mut inner = self.inner.lock();
            let entry = &mut inner.slots[slot.index];
            debug_assert_eq!(entry.tick, tick);
            entry.mark_returned(wait_for_sync);
            inner.num_events += 1;
            if wait_for_sync {
                inner.num_events_sync += 1;
            }
        }

        if wake_synchronizer || wait_for_sync {
            self.provider.signal_sync(wait_for_sync);
        }
        if wait_until_sync_done {
            self.wait_for_tick(tick)?;
        }
        Ok(())
    }

    /// Blocks until `tick` has been committed.
    ///
    /// # Errors
    ///
    /// `SyncTimeout` after the sync timeout, `SysError` if the region
    /// holding `tick` could not be synced.
    pub fn wait_for_tick(&self, tick: Tick) -> CoreResult<()> {
        self.await_tick(tick, self.sync_timeout)
    }

    /// Blocks until `tick` has been committed or `timeout` passed. Returns
    /// whether the tick was committed.
    pub fn wait_for_tick_within(&self, tick: Tick, timeout: Duration) -> bool {
        self.await_tick(tick, timeout).is_ok()
    }

    fn await_tick(&self, tick: Tick, timeout: Duration) -> CoreResult<()> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        let mut timed_out = false;
        loop {
            if let Some(failure) = inner.sync_failure(tick) {
                return Err(CoreError::sys_error(format!(
                    "sync of tick {tick} failed: {}",
                    failure.message
                )));
            }
            if inner.last_committed_tick >= tick {
                return Ok(());
            }
            if timed_out {
                return Err(CoreError::SyncTimeout { tick });
            }
            timed_out = self.changed.wait_until(&mut inner, deadline).timed_out();
        }
    }

    /// Collects the next run of returned slots.
    ///
    /// Starts at the recycle index and merges returned slots of the same
    /// logfile until a slot that is not returned yet or a slot of another
    /// logfile. Returns `None` if the oldest slot is still being written.
    ///
    /// Regions must be returned with
    /// [`return_sync_region`](Self::return_sync_region) before the next
    /// call; there is a single synchronizer.
    pub fn get_sync_region(&self) -> Option<SyncRegion> {
        let inner = self.inner.lock();
        let len = inner.slots.len();
        let mut index = inner.recycle_index;
        let mut region: Option<SyncRegion> = None;
        let mut complete = true;

        for _ in 0..inner.in_use() {
            let slot = &inner.slots[index];
            let Some(logfile) = slot.logfile.as_ref() else {
                complete = false;
                break;
            };
            if let Some(r) = region.as_mut() {
                if r.logfile.id() != logfile.id() {
                    // the previous logfile will not get any more slots
                    r.check_more = true;
                    break;
                }
            }
            if !slot.is_returned() {
                complete = false;
                break;
            }
            match region.as_mut() {
                None => {
                    region = Some(SyncRegion::start(
                        Arc::clone(logfile),
                        index,
                        slot.offset,
                        slot.size,
                        slot.wait_for_sync,
                    ));
                }
                Some(r) => r.extend(index, slot.offset, slot.size, slot.wait_for_sync),
            }
            index = (index + 1) % len;
        }

        let mut region = region?;
        region.can_seal = complete && region.logfile.status() == LogfileStatus::SealRequested;
        Some(region)
    }

    /// Releases a region once the synchronizer is done with it: its slots
    /// become unused, in ring order, and waiters are woken.
    ///
    /// With `Ok(())` the region is committed. With an error the committed
    /// ticks stay where they are and waiters for the region's ticks get the
    /// error instead.
    pub fn return_sync_region(&self, region: SyncRegion, synced: CoreResult<()>) {
        let mut inner = self.inner.lock();
        let len = inner.slots.len();
        let mut index = region.first_slot;

        if let Err(err) = synced {
            let mut tick_min = Tick::MAX;
            let mut tick_max = 0;
            loop {
                let slot = &mut inner.slots[index];
                tick_min = tick_min.min(slot.tick);
                tick_max = tick_max.max(slot.tick);
                slot.reset();
                inner.free_slots += 1;
                if index == region.last_slot {
                    break;
                }
                index = (index + 1) % len;
            }
            warn!(id = %region.logfile.id(), tick_min, tick_max, "region not committed: {err}");
            if inner.failures.len() == MAX_SYNC_FAILURES {
                inner.failures.pop_front();
            }
            inner.failures.push_back(SyncFailure {
                tick_min,
                tick_max,
                message: err.to_string(),
            });
            inner.recycle_index = (region.last_slot + 1) % len;
            drop(inner);

            self.changed.notify_all();
            return;
        }

        loop {
            let (tick, header) = {
                let slot = &mut inner.slots[index];
                let header = slot
                    .logfile
                    .as_ref()
                    .and_then(|lf| committed_header(lf, slot.offset));
                let tick = slot.tick;
                slot.reset();
                (tick, header)
            };

            if let Some(header) = header {
                region.logfile.update(&header);
                if !header.marker_type().is_some_and(MarkerType::is_bookkeeping) {
                    inner.last_committed_data_tick = inner.last_committed_data_tick.max(tick);
                }
            }
            inner.last_committed_tick = inner.last_committed_tick.max(tick);
            inner.free_slots += 1;

            if index == region.last_slot {
                break;
            }
            index = (index + 1) % len;
        }
        inner.recycle_index = (region.last_slot + 1) % len;
        drop(inner);

        self.changed.notify_all();
    }

    /// Writes a footer to the active logfile and requests it to be sealed.
    ///
    /// Returns the footer's tick.
    ///
    /// # Errors
    ///
    /// `DatafileEmpty` if no logfile is active or the active one failed to
    /// sync (it is retired without a footer), `NoJournal` if no slot became
    /// free in time.
    pub fn close_logfile(&self) -> CoreResult<Tick> {
        let deadline = Instant::now() + self.allocation_timeout;
        let mut inner = self.inner.lock();
        loop {
            let Some(lf) = inner.logfile.clone() else {
                return Err(CoreError::DatafileEmpty);
            };
            if lf.status() != LogfileStatus::Open {
                inner.logfile = None;
                return Err(CoreError::DatafileEmpty);
            }
            if lf.has_failed() {
                self.retire_failed(&mut inner, &lf);
                return Err(CoreError::DatafileEmpty);
            }
            if inner.free_slots == 0 {
                self.wait_for_slots(&mut inner, 1, deadline)?;
                continue;
            }
            return self.close_active(&mut inner, &lf);
        }
    }

    /// Seals the active logfile and optionally waits until the footer is
    /// committed.
    ///
    /// # Errors
    ///
    /// See [`close_logfile`](Self::close_logfile) and
    /// [`wait_for_tick`](Self::wait_for_tick).
    pub fn flush(&self, wait_for_sync: bool) -> CoreResult<()> {
        let tick = self.close_logfile()?;
        self.provider.signal_sync(true);
        if wait_for_sync {
            self.wait_for_tick(tick)?;
        }
        Ok(())
    }

    /// Rejects further allocations with `RequestCanceled` and wakes all
    /// waiting writers.
    pub fn shutdown(&self) {
        self.inner.lock().shutdown = true;
        self.changed.notify_all();
    }

    /// Current counters.
    #[must_use]
    pub fn statistics(&self) -> SlotsStatistics {
        let inner = self.inner.lock();
        SlotsStatistics {
            handout_index: inner.handout_index,
            recycle_index: inner.recycle_index,
            free_slots: inner.free_slots,
            last_assigned_tick: inner.last_assigned_tick,
            last_committed_tick: inner.last_committed_tick,
            last_committed_data_tick: inner.last_committed_data_tick,
            num_events: inner.num_events,
            num_events_sync: inner.num_events_sync,
        }
    }

    /// Seeds the tick counters with the highest tick found by recovery.
    pub fn set_last_tick(&self, tick: Tick) {
        let mut inner = self.inner.lock();
        inner.last_assigned_tick = tick;
        inner.last_committed_tick = tick;
        inner.last_committed_data_tick = tick;
    }

    /// The logfile currently being written, if any.
    #[must_use]
    pub fn active_logfile(&self) -> Option<Arc<Logfile>> {
        self.inner.lock().logfile.clone()
    }

    /// In-flight slots of `logfile_id`, or `None` if everything written to
    /// it is committed.
    #[must_use]
    pub fn active_tick_range(&self, logfile_id: FileId) -> Option<ActiveRange> {
        let inner = self.inner.lock();
        let len = inner.slots.len();
        let mut index = inner.recycle_index;
        let mut range: Option<ActiveRange> = None;
        for _ in 0..inner.in_use() {
            let slot = &inner.slots[index];
            if slot.logfile_id() == Some(logfile_id) {
                match range.as_mut() {
                    None => {
                        range = Some(ActiveRange {
                            offset: slot.offset,
                            tick_min: slot.tick,
                            tick_max: slot.tick,
                        });
                    }
                    Some(r) => r.tick_max = slot.tick,
                }
            }
            index = (index + 1) % len;
        }
        range
    }

    fn wait_for_slots(
        &self,
        inner: &mut MutexGuard<'_, SlotsInner>,
        needed: usize,
        deadline: Instant,
    ) -> CoreResult<()> {
        self.provider.signal_sync(false);
        if self.changed.wait_until(inner, deadline).timed_out() && inner.free_slots < needed {
            warn!(
                free = inner.free_slots,
                "no free slot within {:?}", self.allocation_timeout
            );
            return Err(CoreError::NoJournal);
        }
        Ok(())
    }

    /// Obtains a logfile from the provider and makes it active, writing
    /// its header if it is still empty. Returns `false` if none was ready.
    fn open_logfile(&self, inner: &mut SlotsInner, needed: usize) -> CoreResult<bool> {
        let Some(lf) = self.provider.writeable_logfile(needed)? else {
            return Ok(false);
        };

        if lf.status() == LogfileStatus::Empty {
            let maximal = u32::try_from(lf.datafile().maximal_size()).map_err(|_| {
                CoreError::illegal_state(format!("logfile {} exceeds 4 GiB", lf.id()))
            })?;
            self.write_internal(inner, &lf, MarkerBuf::header(maximal, lf.id()), false)?;
            lf.set_status(LogfileStatus::Open);
        }
        debug!(id = %lf.id(), "switched to logfile");
        inner.logfile = Some(lf);
        inner.forget_context();
        Ok(true)
    }

    /// Writes the footer through a slot and hands the logfile over to the
    /// synchronizer for sealing.
    fn close_active(&self, inner: &mut SlotsInner, lf: &Arc<Logfile>) -> CoreResult<Tick> {
        let tick = self.write_internal(inner, lf, MarkerBuf::footer(), true)?;
        lf.set_status(LogfileStatus::SealRequested);
        inner.logfile = None;
        inner.forget_context();
        self.provider.seal_requested(lf);
        debug!(id = %lf.id(), tick, "requested logfile seal");
        Ok(tick)
    }

    /// Stops writing to a logfile whose datafile failed to sync. No footer
    /// is written; the synchronizer drains its remaining slots.
    fn retire_failed(&self, inner: &mut SlotsInner, lf: &Arc<Logfile>) {
        warn!(id = %lf.id(), "retiring logfile after failed sync");
        lf.set_status(LogfileStatus::SealRequested);
        inner.logfile = None;
        inner.forget_context();
        self.provider.seal_requested(lf);
    }

    /// Hands out a slot for a bookkeeping marker, fills it and returns it
    /// right away.
    fn write_internal(
        &self,
        inner: &mut SlotsInner,
        lf: &Arc<Logfile>,
        mut marker: MarkerBuf,
        wait_for_sync: bool,
    ) -> CoreResult<Tick> {
        let offset = if marker.marker_type() == Some(MarkerType::Footer) {
            lf.reserve_footer()?
        } else {
            lf.reserve(marker.size())?
        };
        let tick = self.ticks.next_tick();
        let index = inner.hand_out(lf, offset, aligned_size(marker.size()), tick);
        marker.set_tick(tick);
        let written = lf.write(offset, &mut marker);
        // returned even on failure so the ring keeps moving
        inner.slots[index].mark_returned(wait_for_sync);
        written.map(|()| tick)
    }
}

/// Reads the header of a committed marker.
fn committed_header(lf: &Logfile, offset: usize) -> Option<MarkerHeader> {
    let df = lf.datafile();
    df.read(offset, MARKER_HEADER_SIZE)
        .ok()
        .and_then(MarkerHeader::parse)
}
