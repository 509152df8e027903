//! Background threads of the logfile manager.
//!
//! - synchronizer: drains sync regions, msyncs them and seals logfiles
//! - allocator: keeps reserve logfiles ready and creates oversize ones
//! - remover: deletes collected logfiles beyond the historic limit

use super::inventory::Inventory;
use super::signal::Pending;
use crate::slots::Slots;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Allocator sleep when nothing was requested.
const ALLOCATOR_INTERVAL: Duration = Duration::from_millis(500);

/// Remover sleep between runs.
const REMOVER_INTERVAL: Duration = Duration::from_secs(2);

pub(crate) fn run_synchronizer(inventory: Arc<Inventory>, slots: Arc<Slots>) {
    let interval = inventory.config.sync_interval;
    loop {
        let pending = inventory.synchronizer.wait(interval);
        sync_regions(&inventory, &slots);
        if pending.stop {
            break;
        }
    }
    debug!("synchronizer stopped");
}

/// Syncs and commits every region that is ready. Returns the number of
/// regions handled.
///
/// A region whose msync fails is released uncommitted and its logfile is
/// not sealed.
pub(crate) fn sync_regions(inventory: &Inventory, slots: &Slots) -> usize {
    let mut handled = 0;
    while let Some(region) = slots.get_sync_region() {
        let id = region.logfile.id();
        let synced = region
            .logfile
            .datafile()
            .sync_range(region.offset, region.size);
        if let Err(err) = &synced {
            error!(id = %id, offset = region.offset, size = region.size, "unable to sync logfile region: {err}");
        } else if region.can_seal {
            match region.logfile.seal() {
                Ok(()) => inventory.logfile_sealed(id),
                Err(err) => error!(id = %id, "unable to seal logfile: {err}"),
            }
        }

        slots.return_sync_region(region, synced);
        handled += 1;
    }
    handled
}

pub(crate) fn run_allocator(inventory: Arc<Inventory>) {
    // check the reserve once right away
    let mut pending = Pending::default();
    while !pending.stop {
        let requested = pending.size > 0 && !inventory.has_writeable_logfile(pending.size);
        let created = if requested && inventory.logfile_creation_allowed(pending.size) {
            Some(inventory.create_reserve_logfile(pending.size))
        } else if !inventory.has_reserve_logfiles() {
            Some(inventory.create_reserve_logfile(0))
        } else {
            None
        };

        let worked = match created {
            Some(Ok(_)) => true,
            Some(Err(err)) => {
                error!("unable to create new WAL reserve logfile: {err}");
                false
            }
            None => false,
        };

        pending = inventory
            .allocator
            .wait(if worked { Duration::ZERO } else { ALLOCATOR_INTERVAL });
    }
    debug!("allocator stopped");
}

pub(crate) fn run_remover(inventory: Arc<Inventory>) {
    loop {
        if inventory.remover.wait(REMOVER_INTERVAL).stop {
            break;
        }
        let removed = inventory.remove_logfiles();
        if removed > 0 {
            debug!(removed, "removed collected logfiles");
        }
    }
    debug!("remover stopped");
}
