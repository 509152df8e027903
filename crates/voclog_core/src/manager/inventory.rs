//! The set of logfiles known to a manager.
//!
//! Shared by the manager, its background threads and the slot allocator
//! (through [`LogfileProvider`]).
//!
//! Lock order: slots mutex, then `logfiles`, then a logfile's datafile
//! lock. `ids` is never held while taking `logfiles`.

use super::dir::WalDir;
use super::signal::Signal;
use super::state::ShutdownInfo;
use crate::config::WalConfig;
use crate::error::CoreResult;
use crate::logfile::{Logfile, LogfileStatus};
use crate::marker::JOURNAL_OVERHEAD;
use crate::slots::LogfileProvider;
use crate::tick::TickSource;
use crate::types::{FileId, Tick};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Logfiles removed per remover run at most.
const MAX_REMOVALS_PER_RUN: usize = 5;

/// Ids of the most recently sealed and collected logfiles.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LogfileIds {
    pub(crate) last_sealed: u64,
    pub(crate) last_collected: u64,
}

/// A logfile registered as in use; released on drop.
pub(crate) struct LogfileUse(Arc<Logfile>);

impl LogfileUse {
    fn new(logfile: &Arc<Logfile>) -> Self {
        logfile.use_logfile();
        Self(Arc::clone(logfile))
    }
}

impl Deref for LogfileUse {
    type Target = Logfile;

    fn deref(&self) -> &Logfile {
        &self.0
    }
}

impl Drop for LogfileUse {
    fn drop(&mut self) {
        self.0.release();
    }
}

pub(crate) struct Inventory {
    pub(crate) config: WalConfig,
    pub(crate) dir: WalDir,
    pub(crate) ticks: Arc<dyn TickSource>,
    pub(crate) logfiles: RwLock<BTreeMap<FileId, Arc<Logfile>>>,
    pub(crate) ids: Mutex<LogfileIds>,
    pub(crate) allow_writes: AtomicBool,
    pub(crate) synchronizer: Signal,
    pub(crate) allocator: Signal,
    pub(crate) remover: Signal,
}

impl Inventory {
    pub(crate) fn new(
        config: WalConfig,
        dir: WalDir,
        ticks: Arc<dyn TickSource>,
        logfiles: BTreeMap<FileId, Arc<Logfile>>,
        ids: LogfileIds,
    ) -> Self {
        Self {
            config,
            dir,
            ticks,
            logfiles: RwLock::new(logfiles),
            ids: Mutex::new(ids),
            allow_writes: AtomicBool::new(false),
            synchronizer: Signal::new(),
            allocator: Signal::new(),
            remover: Signal::new(),
        }
    }

    pub(crate) fn allow_writes(&self) -> bool {
        self.allow_writes.load(Ordering::Acquire)
    }

    pub(crate) fn set_allow_writes(&self, value: bool) {
        self.allow_writes.store(value, Ordering::Release);
    }

    pub(crate) fn ids(&self) -> LogfileIds {
        *self.ids.lock()
    }

    pub(crate) fn get(&self, id: FileId) -> Option<Arc<Logfile>> {
        self.logfiles.read().get(&id).cloned()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Logfile>> {
        self.logfiles.read().values().cloned().collect()
    }

    /// Logfiles whose committed ticks overlap `[tick_min, tick_max]`, in id
    /// order and registered as in use. Logfiles without committed markers
    /// are left out.
    pub(crate) fn logfiles_for_range(&self, tick_min: Tick, tick_max: Tick) -> Vec<LogfileUse> {
        let logfiles = self.logfiles.read();
        logfiles
            .values()
            .filter(|lf| {
                if lf.status() == LogfileStatus::Empty {
                    return false;
                }
                let (min, max) = lf.tick_range();
                max != 0 && max >= tick_min && min <= tick_max
            })
            .map(LogfileUse::new)
            .collect()
    }

    /// Whether some logfile could take an entry of `size` bytes already.
    pub(crate) fn has_writeable_logfile(&self, size: usize) -> bool {
        self.logfiles.read().values().any(|lf| lf.is_writeable(size))
    }

    /// Whether another logfile may be created for an entry of `size`
    /// bytes. Oversize entries are always allowed.
    pub(crate) fn logfile_creation_allowed(&self, size: usize) -> bool {
        if size + JOURNAL_OVERHEAD > self.config.effective_logfile_size() {
            return true;
        }
        if self.config.max_open_logfiles == 0 {
            return true;
        }
        let open = self
            .logfiles
            .read()
            .values()
            .filter(|lf| {
                matches!(
                    lf.status(),
                    LogfileStatus::Open | LogfileStatus::SealRequested
                )
            })
            .count();
        open <= self.config.max_open_logfiles
    }

    /// Whether the newest logfiles include enough writeable ones.
    pub(crate) fn has_reserve_logfiles(&self) -> bool {
        let logfiles = self.logfiles.read();
        let mut count = 0;
        for lf in logfiles.values().rev() {
            if lf.free_size() == 0 || lf.is_sealed() {
                // nothing older can be a reserve
                return false;
            }
            count += 1;
            if count >= self.config.reserve_logfiles {
                return true;
            }
        }
        false
    }

    /// Creates an empty logfile for entries of `size` bytes, or of the
    /// regular size if `size` fits into one.
    ///
    /// The file is created under a temporary name and renamed when
    /// complete, so a crash never leaves a partial logfile behind.
    pub(crate) fn create_reserve_logfile(&self, size: usize) -> CoreResult<FileId> {
        let id = FileId::new(self.ticks.next_tick());
        let regular = self.config.effective_logfile_size();
        let real_size = if size + JOURNAL_OVERHEAD > regular {
            size + JOURNAL_OVERHEAD
        } else {
            regular
        };

        let temp_path = self.dir.temp_path(id);
        let logfile = Logfile::create_new(&temp_path, id, real_size)?;
        let renamed = logfile.datafile_mut().rename(&self.dir.logfile_path(id));
        if let Err(err) = renamed {
            drop(logfile);
            if let Err(remove_err) = fs::remove_file(&temp_path) {
                warn!(path = ?temp_path, "cannot remove incomplete logfile: {remove_err}");
            }
            return Err(err);
        }
        self.dir.sync()?;

        info!(id = %id, size = real_size, "created reserve logfile");
        self.logfiles.write().insert(id, Arc::new(logfile));
        Ok(id)
    }

    /// First logfile the collector should process, if any.
    ///
    /// Logfiles are collected in id order, so the search stops at the
    /// first one that is not sealed yet.
    pub(crate) fn collectable_logfile(&self) -> Option<Arc<Logfile>> {
        let logfiles = self.logfiles.read();
        for lf in logfiles.values() {
            match lf.status() {
                LogfileStatus::Collected => continue,
                _ if lf.can_be_collected() => return Some(Arc::clone(lf)),
                _ => return None,
            }
        }
        None
    }

    pub(crate) fn logfile_sealed(&self, id: FileId) {
        let mut ids = self.ids.lock();
        ids.last_sealed = ids.last_sealed.max(id.as_u64());
    }

    pub(crate) fn logfile_collected(&self, id: FileId) -> CoreResult<()> {
        if let Some(lf) = self.get(id) {
            lf.set_status(LogfileStatus::Collected);
        }
        {
            let mut ids = self.ids.lock();
            ids.last_collected = ids.last_collected.max(id.as_u64());
        }
        self.write_shutdown_info(false)?;
        self.remover.notify(0, false);
        Ok(())
    }

    /// Writes the SHUTDOWN file. `clean` adds the shutdown time.
    pub(crate) fn write_shutdown_info(&self, clean: bool) -> CoreResult<()> {
        // held while writing so concurrent writers do not share the temp file
        let ids = self.ids.lock();
        ShutdownInfo {
            tick: self.ticks.current_tick(),
            last_collected: ids.last_collected,
            last_sealed: ids.last_sealed,
            shutdown_time: clean.then(ShutdownInfo::now),
        }
        .save(&self.dir)
    }

    /// Oldest removable logfile once more than `historic_logfiles` are
    /// removable.
    fn removable_logfile(&self) -> Option<Arc<Logfile>> {
        let last_collected = self.ids().last_collected;
        let logfiles = self.logfiles.read();
        let mut first = None;
        let mut count = 0;
        for lf in logfiles.values() {
            if lf.id().as_u64() <= last_collected && lf.can_be_removed() {
                first.get_or_insert_with(|| Arc::clone(lf));
                count += 1;
                if count > self.config.historic_logfiles {
                    return first;
                }
            }
        }
        None
    }

    /// Deletes surplus collected logfiles. Returns how many were removed.
    pub(crate) fn remove_logfiles(&self) -> usize {
        let mut removed = 0;
        while removed < MAX_REMOVALS_PER_RUN {
            let Some(lf) = self.removable_logfile() else {
                break;
            };
            {
                let mut logfiles = self.logfiles.write();
                // a reader may have registered in the meantime
                if !lf.can_be_removed() {
                    break;
                }
                logfiles.remove(&lf.id());
            }
            self.delete_logfile(&lf);
            removed += 1;
        }
        removed
    }

    /// Unmaps a logfile that is no longer in the inventory and deletes its
    /// file.
    fn delete_logfile(&self, lf: &Logfile) {
        let path = lf.path();
        lf.close();
        let Some(path) = path else {
            return;
        };
        match fs::remove_file(&path) {
            Ok(()) => info!(id = %lf.id(), path = ?path, "removed logfile"),
            Err(err) => warn!(id = %lf.id(), path = ?path, "cannot remove logfile: {err}"),
        }
    }
}

impl LogfileProvider for Inventory {
    fn writeable_logfile(&self, size: usize) -> CoreResult<Option<Arc<Logfile>>> {
        let mut found = None;
        let mut too_small: Vec<FileId> = Vec::new();
        {
            let mut logfiles = self.logfiles.write();
            for (id, lf) in logfiles.iter() {
                if lf.is_writeable(size) {
                    found = Some(Arc::clone(lf));
                    break;
                }
                if lf.status() == LogfileStatus::Empty {
                    too_small.push(*id);
                }
            }
            for id in too_small {
                if let Some(lf) = logfiles.remove(&id) {
                    debug!(id = %id, size, "removing empty logfile too small for entry");
                    self.delete_logfile(&lf);
                }
            }
        }

        if found.is_none() {
            self.allocator.notify(size, true);
        }
        Ok(found)
    }

    fn seal_requested(&self, logfile: &Arc<Logfile>) {
        debug!(id = %logfile.id(), "logfile seal requested");
        self.synchronizer.notify(0, true);
    }

    fn signal_sync(&self, wait_for_sync: bool) {
        self.synchronizer.notify(0, wait_for_sync);
    }
}
