//! Sync regions: contiguous runs of returned slots.

use crate::logfile::Logfile;
use std::sync::Arc;

/// A contiguous byte range of one logfile whose slots have all been
/// returned, ready to be synced and committed together.
#[derive(Debug, Clone)]
pub struct SyncRegion {
    /// Logfile the range belongs to.
    pub logfile: Arc<Logfile>,
    /// Offset of the first byte.
    pub offset: usize,
    /// Length in bytes.
    pub size: usize,
    /// Ring index of the first slot.
    pub first_slot: usize,
    /// Ring index of the last slot (inclusive).
    pub last_slot: usize,
    /// Whether any writer asked for durability.
    pub wait_for_sync: bool,
    /// Whether the logfile can be sealed once this range is synced.
    pub can_seal: bool,
    /// Whether slots of another logfile follow this range.
    pub check_more: bool,
}

impl SyncRegion {
    pub(crate) fn start(
        logfile: Arc<Logfile>,
        index: usize,
        offset: usize,
        size: usize,
        wait_for_sync: bool,
    ) -> Self {
        Self {
            logfile,
            offset,
            size,
            first_slot: index,
            last_slot: index,
            wait_for_sync,
            can_seal: false,
            check_more: false,
        }
    }

    /// Extends the region by a slot that directly follows it.
    pub(crate) fn extend(&mut self, index: usize, offset: usize, size: usize, wait_for_sync: bool) {
        self.size = offset + size - self.offset;
        self.last_slot = index;
        self.wait_for_sync |= wait_for_sync;
    }
}
